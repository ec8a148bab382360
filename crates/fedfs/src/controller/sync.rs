use crate::controller::{debug_assert_shared_model, Layer};
use crate::entry::{ArchiveEntry, EntryType, Node};
use crate::error::FsError;
use crate::io::{InputStream, OutputStream};
use crate::model::FsModel;
use crate::mount_point::EntryName;
use crate::options::{AccessModes, AccessOptions, SyncOptions};
use crate::signal::{Attempt, Outcome, Signal};
use log::{debug, warn};
use std::sync::Arc;
use std::time::SystemTime;

/// Answers [`Signal::NeedsSync`] by syncing and retrying the operation.
pub(crate) struct SyncController {
    model: Arc<FsModel>,
    delegate: Box<dyn Layer>,
    max_retries: u32,
}

impl SyncController {
    pub(crate) fn new(model: Arc<FsModel>, delegate: Box<dyn Layer>, max_retries: u32) -> Self {
        debug_assert_shared_model(&model, delegate.as_ref());
        Self {
            model,
            delegate,
            max_retries,
        }
    }

    fn call<T>(&self, name: &EntryName, op: impl Fn(&dyn Layer) -> Attempt<T>) -> Attempt<T> {
        let mut syncs = 0;
        loop {
            match op(self.delegate.as_ref())? {
                Outcome::Retry(Signal::NeedsSync) if syncs < self.max_retries => {
                    syncs += 1;
                    debug!(
                        "{} needs sync, syncing implicitly",
                        self.model.mount_point().resolve(name)
                    );
                    match self.delegate.sync(SyncOptions::SYNC) {
                        Ok(Outcome::Done(())) => {}
                        Ok(Outcome::Retry(signal)) => return Ok(Outcome::Retry(signal)),
                        Err(err) if err.is_warning() => warn!("{}", err),
                        Err(err) => return Err(err),
                    }
                }
                Outcome::Retry(Signal::NeedsSync) => {
                    return Err(FsError::Precondition(format!(
                        "{} still needs sync after {} implicit sync(s)",
                        self.model.mount_point().resolve(name),
                        syncs
                    )))
                }
                outcome => return Ok(outcome),
            }
        }
    }
}

impl Layer for SyncController {
    fn model(&self) -> &Arc<FsModel> {
        &self.model
    }

    fn node(&self, options: AccessOptions, name: &EntryName) -> Attempt<Option<Node>> {
        self.call(name, |layer| layer.node(options, name))
    }

    fn check_access(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modes: AccessModes,
    ) -> Attempt<()> {
        self.call(name, |layer| layer.check_access(options, name, modes))
    }

    fn set_time(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modified: SystemTime,
    ) -> Attempt<()> {
        self.call(name, |layer| layer.set_time(options, name, modified))
    }

    fn input(&self, options: AccessOptions, name: &EntryName) -> Attempt<InputStream> {
        self.call(name, |layer| layer.input(options, name))
    }

    fn output(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<OutputStream> {
        self.call(name, |layer| layer.output(options, name, template))
    }

    fn make(
        &self,
        options: AccessOptions,
        name: &EntryName,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<()> {
        self.call(name, |layer| layer.make(options, name, kind, template))
    }

    fn unlink(&self, options: AccessOptions, name: &EntryName) -> Attempt<()> {
        self.call(name, |layer| layer.unlink(options, name))
    }

    fn sync(&self, options: SyncOptions) -> Attempt<()> {
        self.delegate.sync(options)
    }
}
