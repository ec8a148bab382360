use crate::controller::{debug_assert_shared_model, Layer};
use crate::entry::{ArchiveEntry, EntryType, Node};
use crate::io::{InputStream, OutputStream};
use crate::lock::{LockAspect, ReentrantRwLock};
use crate::model::FsModel;
use crate::mount_point::EntryName;
use crate::options::{AccessModes, AccessOptions, SyncOptions};
use crate::signal::{retry, Attempt, Outcome, Signal};
use log::trace;
use std::sync::Arc;
use std::time::SystemTime;

/// Takes the model's lock around every operation.
///
/// Reads start out read-locked and get rerun write-locked when a lower
/// layer needs to change state, e.g. to mount. Changes run write-locked.
pub(crate) struct LockController {
    model: Arc<FsModel>,
    delegate: Box<dyn Layer>,
}

impl LockController {
    pub(crate) fn new(model: Arc<FsModel>, delegate: Box<dyn Layer>) -> Self {
        debug_assert_shared_model(&model, delegate.as_ref());
        Self { model, delegate }
    }

    fn read_or_write<T>(&self, op: impl Fn(&dyn Layer) -> Attempt<T>) -> Attempt<T> {
        match self.read_locked(|| op(self.delegate.as_ref()))? {
            Outcome::Retry(Signal::NeedsWriteLock) => {
                if self.lock().is_read_locked_by_current_thread() {
                    // an outer frame holds the read lock, it has to let go first
                    return retry(Signal::NeedsWriteLock);
                }
                trace!("{}: upgrading to the write lock", self.model.mount_point());
                self.write_locked(|| op(self.delegate.as_ref()))
            }
            outcome => Ok(outcome),
        }
    }

    fn write<T>(&self, op: impl FnOnce(&dyn Layer) -> Attempt<T>) -> Attempt<T> {
        self.write_locked(|| op(self.delegate.as_ref()))
    }
}

impl LockAspect for LockController {
    fn lock(&self) -> &ReentrantRwLock {
        self.model.lock()
    }
}

impl Layer for LockController {
    fn model(&self) -> &Arc<FsModel> {
        &self.model
    }

    fn node(&self, options: AccessOptions, name: &EntryName) -> Attempt<Option<Node>> {
        self.read_or_write(|layer| layer.node(options, name))
    }

    fn check_access(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modes: AccessModes,
    ) -> Attempt<()> {
        self.read_or_write(|layer| layer.check_access(options, name, modes))
    }

    fn set_time(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modified: SystemTime,
    ) -> Attempt<()> {
        self.write(|layer| layer.set_time(options, name, modified))
    }

    fn input(&self, options: AccessOptions, name: &EntryName) -> Attempt<InputStream> {
        self.read_or_write(|layer| layer.input(options, name))
    }

    fn output(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<OutputStream> {
        self.write(|layer| layer.output(options, name, template))
    }

    fn make(
        &self,
        options: AccessOptions,
        name: &EntryName,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<()> {
        self.write(|layer| layer.make(options, name, kind, template))
    }

    fn unlink(&self, options: AccessOptions, name: &EntryName) -> Attempt<()> {
        self.write(|layer| layer.unlink(options, name))
    }

    fn sync(&self, options: SyncOptions) -> Attempt<()> {
        self.write(|layer| layer.sync(options))
    }
}
