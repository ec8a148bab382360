//! Controllers: the operations every federated file system offers, and the
//! layer chain which implements them for archives.
//!
//! An archive controller is a stack of layers around one shared
//! [`FsModel`], outermost first:
//!
//! ```text
//! false positive -> lock -> sync -> cache -> resource -> target
//! ```
//!
//! Layers below the false positive layer speak [`Attempt`]: besides a value
//! or an error they may return a [`Signal`](crate::Signal) asking an outer
//! layer to retry after some action. No signal leaves the outermost layer.

pub(crate) mod cache;
pub(crate) mod false_positive;
pub(crate) mod lock;
pub(crate) mod resource;
pub(crate) mod sync;
pub(crate) mod target;

use crate::config::FsConfig;
use crate::driver::ArchiveDriver;
use crate::entry::{ArchiveEntry, EntryType, Node};
use crate::error::{FsError, FsResult};
use crate::io::{InputStream, IoBufferPool, OutputStream};
use crate::model::FsModel;
use crate::mount_point::EntryName;
use crate::options::{AccessModes, AccessOptions, SyncOptions};
use crate::signal::Attempt;
use std::sync::Arc;
use std::time::SystemTime;

pub use resource::{OpenStreams, ResourceAccountant};

/// Operations of one file system in a federation.
pub trait FsController: Send + Sync {
    fn model(&self) -> &Arc<FsModel>;

    /// Controller of the enclosing file system, `None` for the host.
    fn parent(&self) -> Option<&Arc<dyn FsController>>;

    /// Snapshot of the node `name`, `None` if there is none.
    fn node(&self, options: AccessOptions, name: &EntryName) -> FsResult<Option<Node>>;

    fn check_access(
        &self,
        options: AccessOptions,
        name: &EntryName,
        modes: AccessModes,
    ) -> FsResult<()>;

    fn set_time(&self, options: AccessOptions, name: &EntryName, modified: SystemTime)
        -> FsResult<()>;

    fn input(&self, options: AccessOptions, name: &EntryName) -> FsResult<InputStream>;

    /// Open a stream which replaces the content of the file `name` once it
    /// is finished.
    fn output(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> FsResult<OutputStream>;

    fn make(
        &self,
        options: AccessOptions,
        name: &EntryName,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
    ) -> FsResult<()>;

    fn unlink(&self, options: AccessOptions, name: &EntryName) -> FsResult<()>;

    /// Commit all changes to the parent file system.
    fn sync(&self, options: SyncOptions) -> FsResult<()>;
}

/// One layer of an archive controller chain.
pub(crate) trait Layer: Send + Sync {
    fn model(&self) -> &Arc<FsModel>;

    fn node(&self, options: AccessOptions, name: &EntryName) -> Attempt<Option<Node>>;

    fn check_access(&self, options: AccessOptions, name: &EntryName, modes: AccessModes)
        -> Attempt<()>;

    fn set_time(&self, options: AccessOptions, name: &EntryName, modified: SystemTime)
        -> Attempt<()>;

    fn input(&self, options: AccessOptions, name: &EntryName) -> Attempt<InputStream>;

    fn output(
        &self,
        options: AccessOptions,
        name: &EntryName,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<OutputStream>;

    fn make(
        &self,
        options: AccessOptions,
        name: &EntryName,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
    ) -> Attempt<()>;

    fn unlink(&self, options: AccessOptions, name: &EntryName) -> Attempt<()>;

    fn sync(&self, options: SyncOptions) -> Attempt<()>;
}

/// Check that a layer is built around the same model as its delegate.
pub(crate) fn debug_assert_shared_model(model: &Arc<FsModel>, delegate: &dyn Layer) {
    debug_assert!(
        Arc::ptr_eq(model.lock_handle(), delegate.model().lock_handle()),
        "layers of {} do not share one lock",
        model.mount_point()
    );
}

/// Build the full controller chain for the archive file system of `model`.
pub(crate) fn new_archive_controller(
    model: Arc<FsModel>,
    parent: Arc<dyn FsController>,
    driver: Arc<dyn ArchiveDriver>,
    config: &FsConfig,
) -> FsResult<Arc<dyn FsController>> {
    let entry = model.mount_point().entry_in_parent().ok_or_else(|| {
        FsError::Precondition(format!("{} is not an archive", model.mount_point()))
    })?;
    let pool = IoBufferPool::new(config.buffer_spill_threshold);

    let target = target::TargetArchiveController::new(
        Arc::clone(&model),
        Arc::clone(&parent),
        entry.clone(),
        driver,
        pool,
    );
    let accountant = resource::ResourceAccountant::new();
    let resource = resource::ResourceController::new(
        Arc::clone(&model),
        Box::new(target),
        Arc::clone(&accountant),
        config.wait_close_timeout(),
    );
    let cache = cache::CacheController::new(
        Arc::clone(&model),
        Box::new(resource),
        accountant,
        config.wait_close_timeout(),
    );
    let sync = sync::SyncController::new(
        Arc::clone(&model),
        Box::new(cache),
        config.max_sync_retries,
    );
    let lock = lock::LockController::new(Arc::clone(&model), Box::new(sync));
    Ok(Arc::new(false_positive::FalsePositiveController::new(
        model,
        Box::new(lock),
        parent,
        entry,
    )))
}
