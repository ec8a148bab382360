//! # fedfs-zip
//!
//! ZIP archive driver for fedfs.
//!
//! This crate provides:
//! - [`ZipDriver`], an [`ArchiveDriver`](fedfs::ArchiveDriver) which reads
//!   and writes ZIP archives nested anywhere in a federation
//! - [`ZipDriverConfig`], loadable from TOML
//! - The `fedfs` command-line tool (with the `cli` feature)
//!
//! ## Features
//!
//! - `cli`: Builds the `fedfs` binary
//!
//! ## Example
//!
//! ```ignore
//! use fedfs::{ArchiveDetector, DriverRegistry, FsConfig, FsManager};
//! use fedfs_zip::ZipDriver;
//! use std::sync::Arc;
//!
//! let mut registry = DriverRegistry::new(FsConfig::default());
//! let mut detector = ArchiveDetector::new();
//! ZipDriver::default().install(&mut registry, &mut detector);
//! let manager = FsManager::new(Arc::new(registry), FsConfig::default());
//!
//! let (mount_point, name) = detector.resolve("/tmp/app.jar/META-INF/MANIFEST.MF")?;
//! let text = manager.controller(&mount_point)?.input(Default::default(), &name)?.read_to_vec()?;
//! ```

mod driver;
mod error;
mod input;
mod output;
mod time;

pub use driver::{ZipDriver, ZipDriverConfig};
pub use error::{Error, Result};
pub use input::ZipInput;
pub use output::ZipOutput;
