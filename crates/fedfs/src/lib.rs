//! # fedfs
//!
//! Federated file systems: read and write nested archives as if they were
//! plain directories.
//!
//! This crate provides:
//! - The archive controller chain, which mounts archives lazily and detects
//!   files which merely look like archives
//! - A write-back cache for entry content
//! - Sync, which commits all pending changes of an archive to its parent
//!   file system at once
//! - The manager, which hands out controllers and syncs them children first
//!
//! Archive formats plug in through [`ArchiveDriver`]; the ZIP driver lives
//! in the `fedfs-zip` crate.
//!
//! ## Example
//!
//! ```ignore
//! use fedfs::{AccessOptions, ArchiveDetector, DriverRegistry, FsConfig, FsManager, SyncOptions};
//! use fedfs_zip::ZipDriver;
//! use std::io::Write;
//! use std::sync::Arc;
//!
//! let registry = DriverRegistry::new(FsConfig::default())
//!     .with("zip", Arc::new(ZipDriver::default()));
//! let manager = FsManager::new(Arc::new(registry), FsConfig::default());
//! let detector = ArchiveDetector::new().with("zip", "zip");
//!
//! let (mount_point, name) = detector.resolve("/tmp/work/a.zip/docs/hello.txt")?;
//! let controller = manager.controller(&mount_point)?;
//! let mut out = controller.output(AccessOptions::CREATE_PARENTS, &name, None)?;
//! out.write_all(b"hello")?;
//! out.finish()?;
//!
//! // nothing is written to a.zip before this
//! manager.sync(SyncOptions::UMOUNT)?;
//! ```

#[macro_use]
pub mod signal;

mod archive;
pub mod config;
pub mod controller;
pub mod detector;
pub mod driver;
pub mod entry;
pub mod error;
pub(crate) mod fs;
pub mod host;
pub mod io;
pub mod lock;
pub mod manager;
pub mod model;
pub mod mount_point;
pub mod options;

#[cfg(test)]
mod testing;

pub use config::FsConfig;
pub use controller::{FsController, OpenStreams, ResourceAccountant};
pub use detector::ArchiveDetector;
pub use driver::{ArchiveDriver, CompositeDriver, DriverRegistry, InputService, OutputService};
pub use entry::{ArchiveEntry, EntryType, Node};
pub use error::{FsError, FsResult, Severity, SyncError, SyncErrorBuilder};
pub use host::HostController;
pub use io::{EntrySink, InputStream, IoBuffer, IoBufferPool, OutputStream};
pub use manager::{shutdown, FsManager};
pub use model::{FsModel, MountListener};
pub use mount_point::{EntryName, MountPoint, HOST_SCHEME};
pub use options::{AccessModes, AccessOptions, SyncOptions};
pub use signal::{FalsePositive, Outcome, Signal};
