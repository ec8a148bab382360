//! Control-flow signals.
//!
//! A layer that cannot finish an operation in its current state does not fail,
//! it asks its caller to retry after some action. The request travels as
//! [`Outcome::Retry`] next to the error channel, never inside it.

use crate::error::{FsError, FsResult};
use std::fmt;
use std::sync::Arc;

/// What the caller has to do before retrying.
#[derive(Debug)]
pub enum Signal {
    /// Sync the archive, then retry.
    NeedsSync,
    /// Release every lock of the archive, acquire its write lock, then retry.
    NeedsWriteLock,
    /// The target is not an archive: retry the operation at the parent.
    FalsePositive(FalsePositive),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::NeedsSync => "needs sync",
            Signal::NeedsWriteLock => "needs write lock",
            Signal::FalsePositive(fp) if fp.is_persistent() => "persistent false positive",
            Signal::FalsePositive(_) => "transient false positive",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A file which was addressed as an archive but is none.
#[derive(Debug, Clone)]
pub struct FalsePositive {
    cause: Arc<FsError>,
    persistent: bool,
}

impl FalsePositive {
    /// The archive can never be mounted until its parent entry changes.
    pub fn persistent(cause: FsError) -> Self {
        Self {
            cause: Arc::new(cause),
            persistent: true,
        }
    }

    /// Mounting may succeed on a later call, e.g. once a key is available.
    pub fn transient(cause: FsError) -> Self {
        Self {
            cause: Arc::new(cause),
            persistent: false,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn cause(&self) -> &Arc<FsError> {
        &self.cause
    }

    /// The error to report when the parent cannot serve the request either.
    pub fn into_error(self, suppressed: Option<FsError>) -> FsError {
        FsError::FalsePositive {
            cause: self.cause,
            suppressed: suppressed.map(Box::new),
        }
    }
}

/// Either a finished operation or a request to retry it.
#[derive(Debug)]
#[must_use]
pub enum Outcome<T> {
    Done(T),
    Retry(Signal),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::Retry(signal) => Outcome::Retry(signal),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    /// Turn a signal which escaped every layer able to handle it into an
    /// error.
    pub fn settle(self) -> FsResult<T> {
        match self {
            Outcome::Done(value) => Ok(value),
            Outcome::Retry(Signal::FalsePositive(fp)) => Err(fp.into_error(None)),
            Outcome::Retry(signal) => Err(FsError::Precondition(format!(
                "control-flow signal escaped the controller chain: {}",
                signal
            ))),
        }
    }
}

/// Result of a layer operation.
pub type Attempt<T> = Result<Outcome<T>, FsError>;

pub(crate) fn done<T>(value: T) -> Attempt<T> {
    Ok(Outcome::Done(value))
}

pub(crate) fn retry<T>(signal: Signal) -> Attempt<T> {
    Ok(Outcome::Retry(signal))
}

/// Unwrap a finished [`Attempt`], or return its retry request (and errors)
/// from the enclosing function.
#[macro_export]
macro_rules! attempt {
    ($e:expr) => {
        match $e? {
            $crate::signal::Outcome::Done(value) => value,
            $crate::signal::Outcome::Retry(signal) => {
                return Ok($crate::signal::Outcome::Retry(signal))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner(fail: bool) -> Attempt<u32> {
        if fail {
            retry(Signal::NeedsSync)
        } else {
            done(7)
        }
    }

    fn outer(fail: bool) -> Attempt<u32> {
        let value = attempt!(inner(fail));
        done(value + 1)
    }

    #[test]
    fn attempt_unwraps_done() {
        assert!(matches!(outer(false), Ok(Outcome::Done(8))));
    }

    #[test]
    fn attempt_forwards_retry() {
        assert!(matches!(
            outer(true),
            Ok(Outcome::Retry(Signal::NeedsSync))
        ));
    }

    #[test]
    fn escaped_false_positive_settles_into_its_cause() {
        let outcome: Outcome<()> = Outcome::Retry(Signal::FalsePositive(
            FalsePositive::persistent(FsError::InvalidArchive("bad header".into())),
        ));
        let err = outcome.settle().unwrap_err();
        assert_eq!(err.to_string(), "invalid archive: bad header");
    }

    #[test]
    fn escaped_lock_signal_is_a_precondition_failure() {
        let outcome: Outcome<()> = Outcome::Retry(Signal::NeedsWriteLock);
        assert!(matches!(outcome.settle(), Err(FsError::Precondition(_))));
    }
}
