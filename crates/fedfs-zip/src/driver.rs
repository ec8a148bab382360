//! The ZIP [`ArchiveDriver`] and its configuration.

use crate::error::{Error, Result};
use crate::input::{spool, ZipInput};
use crate::output::ZipOutput;
use fedfs::{
    AccessOptions, ArchiveDetector, ArchiveDriver, DriverRegistry, EntryName, FsController,
    FsModel, FsResult, InputService, IoBufferPool, OutputService,
};
use log::trace;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Settings of the ZIP driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZipDriverConfig {
    /// File name extensions handled as ZIP archives. Each one is registered
    /// as a scheme of its own.
    pub extensions: Vec<String>,
    /// Deflate entries which have no compression preference.
    pub compress: bool,
}

impl Default for ZipDriverConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["zip".to_string(), "jar".to_string()],
            compress: true,
        }
    }
}

impl ZipDriverConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::ConfigError(e.to_string()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Reads and writes ZIP archives.
#[derive(Debug, Clone, Default)]
pub struct ZipDriver {
    config: ZipDriverConfig,
}

impl ZipDriver {
    pub fn new(config: ZipDriverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ZipDriverConfig {
        &self.config
    }

    /// Register this driver for all configured extensions.
    pub fn install(self, registry: &mut DriverRegistry, detector: &mut ArchiveDetector) {
        let extensions = self.config.extensions.clone();
        let driver: Arc<dyn ArchiveDriver> = Arc::new(self);
        for extension in &extensions {
            let scheme = extension.trim_start_matches('.').to_ascii_lowercase();
            registry.register(&scheme, Arc::clone(&driver));
            detector.register(extension, &scheme);
        }
    }
}

impl ArchiveDriver for ZipDriver {
    fn new_input_service(
        &self,
        model: &FsModel,
        parent: &dyn FsController,
        name: &EntryName,
        options: AccessOptions,
        pool: &IoBufferPool,
    ) -> FsResult<Box<dyn InputService>> {
        trace!("reading zip archive {}", model.mount_point());
        let mut input = parent.input(options, name)?;
        let buffer = spool(&mut input, pool)?;
        drop(input);
        Ok(Box::new(ZipInput::new(buffer, *pool)?))
    }

    fn new_output_service(
        &self,
        model: &FsModel,
        parent: &dyn FsController,
        name: &EntryName,
        options: AccessOptions,
        _source: Option<&dyn InputService>,
        pool: &IoBufferPool,
    ) -> FsResult<Box<dyn OutputService>> {
        trace!("writing zip archive {}", model.mount_point());
        let stream = parent.output(options, name, None)?;
        Ok(Box::new(ZipOutput::new(stream, *pool, self.config.compress)))
    }
}
