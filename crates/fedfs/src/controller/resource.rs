//! Accounting of the streams a controller has handed out.
//!
//! Every stream opened through an archive controller registers here. A sync
//! may only proceed once no stream is open, so this layer waits for streams
//! of other threads, closes them forcibly, or refuses, depending on the sync
//! options.

use crate::controller::{debug_assert_shared_model, Layer};
use crate::entry::{ArchiveEntry, EntryType, Node};
use crate::error::{FsError, FsResult, SyncErrorBuilder};
use crate::io::{InputStream, OutputStream};
use crate::lock::{LockAspect, ReentrantRwLock};
use crate::model::FsModel;
use crate::mount_point::{EntryName, MountPoint};
use crate::options::{AccessModes, AccessOptions, SyncOptions};
use crate::signal::{done, Attempt};
use log::warn;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// Shared close state of one accounted stream.
#[derive(Debug)]
pub(crate) struct StreamControl {
    id: u64,
    owner: ThreadId,
    closed: Mutex<bool>,
    accountant: Weak<ResourceAccountant>,
}

impl StreamControl {
    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Close the stream, running `op` with whether it had been force closed
    /// already. The state mutex is held while `op` runs, so a forced close
    /// cannot interleave with committing the stream.
    pub(crate) fn close_with<T>(&self, op: impl FnOnce(bool) -> T) -> T {
        let mut closed = self.closed.lock();
        let result = op(*closed);
        *closed = true;
        drop(closed);
        if let Some(accountant) = self.accountant.upgrade() {
            accountant.release(self.id);
        }
        result
    }

    fn force_close(&self) -> bool {
        let mut closed = self.closed.lock();
        !std::mem::replace(&mut *closed, true)
    }
}

/// Counts of open streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenStreams {
    pub total: usize,
    /// Streams owned by the current thread.
    pub local: usize,
}

impl OpenStreams {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn into_error(self) -> FsError {
        FsError::ResourceOpen {
            total: self.total,
            local: self.local,
        }
    }
}

/// Registry of the streams open on one archive.
///
/// Lock order: a stream's state mutex before the registry mutex.
#[derive(Debug, Default)]
pub struct ResourceAccountant {
    streams: Mutex<HashMap<u64, Arc<StreamControl>>>,
    released: Condvar,
    next_id: AtomicU64,
}

impl ResourceAccountant {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn register(self: &Arc<Self>) -> Arc<StreamControl> {
        let control = Arc::new(StreamControl {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            owner: thread::current().id(),
            closed: Mutex::new(false),
            accountant: Arc::downgrade(self),
        });
        self.streams.lock().insert(control.id, Arc::clone(&control));
        control
    }

    fn release(&self, id: u64) {
        let removed = self.streams.lock().remove(&id);
        if removed.is_some() {
            self.released.notify_all();
        }
    }

    fn count(streams: &HashMap<u64, Arc<StreamControl>>) -> OpenStreams {
        let me = thread::current().id();
        OpenStreams {
            total: streams.len(),
            local: streams.values().filter(|c| c.owner == me).count(),
        }
    }

    pub fn open_streams(&self) -> OpenStreams {
        Self::count(&self.streams.lock())
    }

    /// Wait up to `timeout` until only streams of the current thread are
    /// left open, then report what is still open.
    pub fn wait_other_threads(&self, timeout: Duration) -> OpenStreams {
        let deadline = Instant::now() + timeout;
        let mut streams = self.streams.lock();
        loop {
            let open = Self::count(&streams);
            if open.total == open.local {
                return open;
            }
            if self.released.wait_until(&mut streams, deadline).timed_out() {
                return Self::count(&streams);
            }
        }
    }

    /// Get rid of open streams before a sync. Waits for streams of other
    /// threads with `WAIT_CLOSE_IO`, then force closes what is left with
    /// `FORCE_CLOSE_IO` and records a warning, or fails with
    /// [`FsError::ResourceOpen`].
    pub(crate) fn close_for_sync(
        &self,
        options: SyncOptions,
        wait_timeout: Duration,
        mount_point: &MountPoint,
        builder: &mut SyncErrorBuilder,
    ) -> FsResult<()> {
        let timeout = if options.contains(SyncOptions::WAIT_CLOSE_IO) {
            wait_timeout
        } else {
            Duration::ZERO
        };
        let open = self.wait_other_threads(timeout);
        if open.is_empty() {
            return Ok(());
        }
        if !options.contains(SyncOptions::FORCE_CLOSE_IO) {
            return Err(open.into_error());
        }
        let closed = self.close_all();
        warn!("{}: forced {} open stream(s) closed", mount_point, closed);
        builder.warn(open.into_error());
        Ok(())
    }

    /// Close every open stream. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let snapshot: Vec<Arc<StreamControl>> =
            self.streams.lock().drain().map(|(_, c)| c).collect();
        self.released.notify_all();
        snapshot.iter().filter(|control| control.force_close()).count()
    }
}

pub(crate) struct ResourceController {
    model: Arc<FsModel>,
    delegate: Box<dyn Layer>,
    accountant: Arc<ResourceAccountant>,
    wait_timeout: Duration,
}

impl ResourceController {
    /// `accountant` is shared with the layers above which hand out streams
    /// of their own.
    pub(crate) fn new(
        model: Arc<FsModel>,
        delegate: Box<dyn Layer>,
        accountant: Arc<ResourceAccountant>,
        wait_timeout: Duration,
    ) -> Self {
        debug_assert_shared_model(&model, delegate.as_ref());
        Self {
            model,
            delegate,
            accountant,
            wait_timeout,
        }
    }
}

impl LockAspect for ResourceController {
    fn lock(&self) -> &ReentrantRwLock {
        self.model.lock()
    }
}

impl Layer for ResourceController {
    fn model(&self) -> &Arc<FsModel> {
        &self.model
    }

    fn node(&self, options: AccessOptions, name: &EntryName) -> Attempt<Option<Node>> {
        self.delegate.node(options, name)
    }

    fn check_access(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modes: AccessModes,
    ) -> Attempt<()> {
        self.delegate.check_access(options, name, modes)
    }

    fn set_time(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modified: std::time::SystemTime,
    ) -> Attempt<()> {
        self.delegate.set_time(options, name, modified)
    }

    fn input(&self, options: AccessOptions, name: &EntryName) -> Attempt<InputStream> {
        let stream = attempt!(self.delegate.input(options, name));
        done(stream.accounted(self.accountant.register()))
    }

    fn output(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<OutputStream> {
        let stream = attempt!(self.delegate.output(options, name, template));
        done(stream.accounted(self.accountant.register()))
    }

    fn make(
        &self,
        options: AccessOptions,
        name: &EntryName,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<()> {
        self.delegate.make(options, name, kind, template)
    }

    fn unlink(&self, options: AccessOptions, name: &EntryName) -> Attempt<()> {
        self.delegate.unlink(options, name)
    }

    fn sync(&self, options: SyncOptions) -> Attempt<()> {
        attempt!(self.check_write_locked_by_current_thread());
        let mut builder = SyncErrorBuilder::new();
        self.accountant.close_for_sync(
            options,
            self.wait_timeout,
            self.model.mount_point(),
            &mut builder,
        )?;

        match self.delegate.sync(options) {
            Ok(outcome) if !outcome.is_done() => return Ok(outcome),
            Ok(_) => {}
            Err(err) => builder.absorb(err),
        }
        builder.check()?;
        done(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::VecSink;
    use std::io::{Read, Write};

    #[test]
    fn streams_release_on_drop() {
        let accountant = ResourceAccountant::new();
        let stream = InputStream::new(std::io::empty()).accounted(accountant.register());
        assert_eq!(accountant.open_streams(), OpenStreams { total: 1, local: 1 });
        drop(stream);
        assert!(accountant.open_streams().is_empty());
    }

    #[test]
    fn forced_close_fails_reads_and_discards_output() {
        let accountant = ResourceAccountant::new();
        let mut input = InputStream::new(std::io::Cursor::new(vec![1u8; 4]))
            .accounted(accountant.register());

        let committed = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&committed);
        let mut output = OutputStream::new(
            "x",
            Box::new(VecSink::new(move |_| {
                *flag.lock() = true;
                Ok(())
            })),
        )
        .accounted(accountant.register());
        output.write_all(b"data").unwrap();

        assert_eq!(accountant.close_all(), 2);
        assert!(accountant.open_streams().is_empty());

        let mut buf = [0u8; 4];
        assert!(input.read(&mut buf).is_err());
        assert!(matches!(output.finish(), Err(FsError::OutputClosed)));
        assert!(!*committed.lock());
    }

    #[test]
    fn waits_for_streams_of_other_threads() {
        let accountant = ResourceAccountant::new();
        let stream = {
            let accountant = Arc::clone(&accountant);
            thread::spawn(move || {
                InputStream::new(std::io::empty()).accounted(accountant.register())
            })
                .join()
                .unwrap()
        };
        let open = accountant.wait_other_threads(Duration::from_millis(20));
        assert_eq!(open, OpenStreams { total: 1, local: 0 });

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(stream);
        });
        let open = accountant.wait_other_threads(Duration::from_secs(5));
        assert!(open.is_empty());
        closer.join().unwrap();
    }
}
