use std::fmt;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when working with federated file systems.
#[derive(Debug, Error)]
pub enum FsError {
    /// I/O error from the host or from a driver.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The entry name is malformed.
    #[error("invalid entry name: {0}")]
    InvalidName(String),

    /// The addressed entry does not exist.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// The addressed entry exists but was requested exclusively.
    #[error("entry already exists: {0}")]
    EntryExists(String),

    /// A directory was expected.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A file was expected.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// The directory still has members.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// The file system denies write access.
    #[error("read-only file system: {0}")]
    ReadOnly(String),

    /// Streams are still open where none may be.
    #[error("{total} stream(s) still open, {local} of them owned by the current thread")]
    ResourceOpen { total: usize, local: usize },

    /// The input stream or input service has been closed.
    #[error("input has been closed")]
    InputClosed,

    /// The output stream or output service has been closed.
    #[error("output has been closed")]
    OutputClosed,

    /// The driver could not parse the archive.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// The archive needs a key which is not available right now.
    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// A false positive archive failed at the parent as well. Carries the
    /// original cause, the parent's failure is kept as suppressed context.
    #[error("{cause}")]
    FalsePositive {
        #[source]
        cause: Arc<FsError>,
        suppressed: Option<Box<FsError>>,
    },

    /// Aggregated failure of a sync operation.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The operation is not supported by this file system.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A programming error: an invariant or precondition does not hold.
    #[error("precondition violated: {0}")]
    Precondition(String),
}

impl FsError {
    /// True if this is a sync failure which still committed all changes.
    pub fn is_warning(&self) -> bool {
        matches!(self, FsError::Sync(err) if err.is_warning())
    }

    /// True if the error only says that some entry does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            FsError::EntryNotFound(_) => true,
            FsError::Io(err) => err.kind() == io::ErrorKind::NotFound,
            FsError::FalsePositive { cause, .. } => cause.is_not_found(),
            _ => false,
        }
    }
}

/// Result type for fedfs operations.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Priority of a failure collected during sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// All changes were committed, but something deserves attention.
    Warning,
    /// Some changes were lost.
    Failure,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("sync warning"),
            Severity::Failure => f.write_str("sync failed"),
        }
    }
}

/// The outcome of a sync operation which did not go cleanly.
///
/// The first failure of the highest severity is the primary one, every other
/// failure is kept as suppressed context in collection order.
#[derive(Debug)]
pub struct SyncError {
    failures: Vec<(Severity, FsError)>,
}

impl SyncError {
    pub fn severity(&self) -> Severity {
        self.failures[0].0
    }

    pub fn is_warning(&self) -> bool {
        self.severity() == Severity::Warning
    }

    pub fn primary(&self) -> &FsError {
        &self.failures[0].1
    }

    pub fn suppressed(&self) -> impl Iterator<Item = &FsError> {
        self.failures[1..].iter().map(|(_, err)| err)
    }

    pub fn into_failures(self) -> Vec<(Severity, FsError)> {
        self.failures
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity(), self.primary())?;
        let more = self.failures.len() - 1;
        if more > 0 {
            write!(f, " (+{} suppressed)", more)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.primary())
    }
}

/// Collects failures while a sync keeps going and decides what to surface.
#[derive(Debug, Default)]
pub struct SyncErrorBuilder {
    failures: Vec<(Severity, FsError)>,
}

impl SyncErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure which did not cost any changes.
    pub fn warn(&mut self, err: FsError) {
        self.push(Severity::Warning, err);
    }

    /// Record a failure which lost changes.
    pub fn fail(&mut self, err: FsError) {
        self.push(Severity::Failure, err);
    }

    /// Record an error returned by a nested sync, keeping its own severity.
    /// Any other error counts as a failure.
    pub fn absorb(&mut self, err: FsError) {
        match err {
            FsError::Sync(nested) => self.failures.extend(nested.failures),
            other => self.fail(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    fn push(&mut self, severity: Severity, err: FsError) {
        match err {
            FsError::Sync(nested) => {
                for (inner, err) in nested.failures {
                    self.failures.push((inner.max(severity), err));
                }
            }
            other => self.failures.push((severity, other)),
        }
    }

    /// Surface the collected failures, if any.
    pub fn check(self) -> FsResult<()> {
        let mut failures = self.failures;
        if failures.is_empty() {
            return Ok(());
        }
        let primary = failures
            .iter()
            .enumerate()
            .max_by(|(i, a), (j, b)| a.0.cmp(&b.0).then(j.cmp(i)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let first = failures.remove(primary);
        failures.insert(0, first);
        Err(FsError::Sync(SyncError { failures }))
    }
}
