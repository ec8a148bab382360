//! Archive drivers and the registry which maps schemes to controllers.

use crate::config::FsConfig;
use crate::controller::{self, FsController};
use crate::entry::{ArchiveEntry, EntryType};
use crate::error::{FsError, FsResult};
use crate::host::HostController;
use crate::io::{InputStream, IoBufferPool};
use crate::model::FsModel;
use crate::mount_point::{EntryName, HOST_SCHEME};
use crate::options::AccessOptions;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

/// Read access to the entries of one archive.
pub trait InputService: Send {
    /// All entries, in archive order.
    fn entries(&self) -> Vec<ArchiveEntry>;

    fn entry(&self, name: &str, kind: EntryType) -> Option<ArchiveEntry>;

    fn open(&mut self, name: &str) -> FsResult<InputStream>;

    /// Release the archive. Any later `open` fails with
    /// [`FsError::InputClosed`].
    fn close(&mut self) -> FsResult<()>;
}

/// Write access to a new version of one archive.
///
/// Writing the same name and kind twice replaces the earlier entry.
pub trait OutputService: Send {
    fn entry(&self, name: &str, kind: EntryType) -> Option<ArchiveEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add an entry. Directories come with empty content.
    fn write_entry(&mut self, entry: ArchiveEntry, content: &mut dyn Read) -> FsResult<()>;

    /// Commit the archive to its parent.
    fn close(&mut self) -> FsResult<()>;

    /// Throw the new version away, leaving the parent entry as it was.
    fn discard(&mut self);
}

/// Reads and writes one archive format.
pub trait ArchiveDriver: Send + Sync + fmt::Debug {
    /// Open the archive stored as `name` in `parent`.
    fn new_input_service(
        &self,
        model: &FsModel,
        parent: &dyn FsController,
        name: &EntryName,
        options: AccessOptions,
        pool: &IoBufferPool,
    ) -> FsResult<Box<dyn InputService>>;

    /// Start a new version of the archive stored as `name` in `parent`.
    /// `source` is the current version, if any.
    fn new_output_service(
        &self,
        model: &FsModel,
        parent: &dyn FsController,
        name: &EntryName,
        options: AccessOptions,
        source: Option<&dyn InputService>,
        pool: &IoBufferPool,
    ) -> FsResult<Box<dyn OutputService>>;

    /// Metadata for a new entry.
    fn new_entry(
        &self,
        name: &str,
        kind: EntryType,
        template: Option<&ArchiveEntry>,
        options: AccessOptions,
    ) -> ArchiveEntry {
        let mut entry = ArchiveEntry::new(name, kind);
        if let Some(template) = template {
            entry.modified = template.modified;
        }
        if options.contains(AccessOptions::STORE) {
            entry.compressed = Some(false);
        } else if options.contains(AccessOptions::COMPRESS) {
            entry.compressed = Some(true);
        }
        entry
    }
}

/// Creates the controller for a model.
pub trait CompositeDriver: Send + Sync {
    fn new_controller(
        &self,
        model: Arc<FsModel>,
        parent: Option<Arc<dyn FsController>>,
    ) -> FsResult<Arc<dyn FsController>>;
}

/// Maps schemes to drivers: the host scheme to the host file system, every
/// other registered scheme to an archive controller chain.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn ArchiveDriver>>,
    config: FsConfig,
}

impl DriverRegistry {
    pub fn new(config: FsConfig) -> Self {
        Self {
            drivers: BTreeMap::new(),
            config,
        }
    }

    pub fn with(mut self, scheme: &str, driver: Arc<dyn ArchiveDriver>) -> Self {
        self.register(scheme, driver);
        self
    }

    pub fn register(&mut self, scheme: &str, driver: Arc<dyn ArchiveDriver>) {
        self.drivers.insert(scheme.to_ascii_lowercase(), driver);
    }

    pub fn driver(&self, scheme: &str) -> Option<&Arc<dyn ArchiveDriver>> {
        self.drivers.get(scheme)
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }
}

impl CompositeDriver for DriverRegistry {
    fn new_controller(
        &self,
        model: Arc<FsModel>,
        parent: Option<Arc<dyn FsController>>,
    ) -> FsResult<Arc<dyn FsController>> {
        let scheme = model.mount_point().scheme().to_string();
        match parent {
            None if scheme == HOST_SCHEME => Ok(Arc::new(HostController::new(model)?)),
            None => Err(FsError::Precondition(format!(
                "{} needs a parent file system",
                model.mount_point()
            ))),
            Some(parent) => {
                let driver = self
                    .drivers
                    .get(&scheme)
                    .ok_or_else(|| {
                        FsError::Unsupported(format!("no driver for scheme {}", scheme))
                    })?;
                controller::new_archive_controller(model, parent, Arc::clone(driver), &self.config)
            }
        }
    }
}
