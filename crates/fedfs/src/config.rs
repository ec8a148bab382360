use crate::error::{FsError, FsResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of a [`FsManager`](crate::FsManager) and the chains it builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Upper bound in milliseconds for waiting on streams of other threads
    /// when syncing with `WAIT_CLOSE_IO`.
    pub wait_close_timeout_ms: u64,
    /// Bytes an I/O buffer keeps in memory before spilling to a temp file.
    pub buffer_spill_threshold: usize,
    /// Whether mounting an archive arms the shutdown sync.
    pub sync_on_shutdown: bool,
    /// How many implicit syncs a single operation may trigger.
    pub max_sync_retries: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            wait_close_timeout_ms: 1000,
            buffer_spill_threshold: 1024 * 1024,
            sync_on_shutdown: true,
            max_sync_retries: 1,
        }
    }
}

impl FsConfig {
    pub fn from_toml_str(text: &str) -> FsResult<Self> {
        toml::from_str(text).map_err(|e| FsError::Precondition(format!("invalid config: {}", e)))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> FsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn wait_close_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_close_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config = FsConfig::from_toml_str("max_sync_retries = 3\n").unwrap();
        assert_eq!(config.max_sync_retries, 3);
        assert_eq!(config.wait_close_timeout(), Duration::from_secs(1));
        assert!(config.sync_on_shutdown);
    }

    #[test]
    fn rejects_garbage() {
        assert!(FsConfig::from_toml_str("wait_close_timeout_ms = \"soon\"").is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = FsConfig {
            buffer_spill_threshold: 4096,
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(FsConfig::from_toml_str(&text).unwrap(), config);
    }
}
