//! Manager Configuration
//!
//! Defaults, limits and the TOML-backed configuration file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::engine::NetworkConstraint;
use crate::error::{DownloadError, DownloadResult};

/// Concurrent transfers when nothing else is configured
pub const DEFAULT_CONCURRENCY_LIMIT: u32 = 3;

/// How long an event for an unattached handle is kept (5 s)
pub const DEFAULT_PENDING_EVENT_TTL_MS: u64 = 5_000;

/// Buffered events kept per unattached handle
pub const DEFAULT_MAX_PENDING_EVENTS_PER_HANDLE: usize = 64;

/// Unattached handles buffered at once
pub const DEFAULT_MAX_PENDING_HANDLES: usize = 256;

/// Capacity of the notification broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Sentinel ids used for failures that have no caller id
pub mod sentinel {
    pub const INITIALIZE: &str = "Initialize";
    pub const DOWNLOAD_FILE: &str = "DownloadFile";
    pub const PAUSE: &str = "Pause";
    pub const RESUME: &str = "Resume";
    pub const CANCEL: &str = "Cancel";
    pub const CANCEL_ALL: &str = "CancelAllDownloads";
    pub const DELETE_ALL: &str = "DeleteAllDownloads";
}

/// Download manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum concurrent transfers handed to the engine
    pub concurrency_limit: u32,
    /// Network constraint captured by new downloads
    pub network: NetworkConstraint,
    /// Attach human-readable sizes to progress notifications
    pub auto_convert_units: bool,
    pub pending_event_ttl_ms: u64,
    pub max_pending_events_per_handle: usize,
    pub max_pending_handles: usize,
    pub event_channel_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            network: NetworkConstraint::Any,
            auto_convert_units: false,
            pending_event_ttl_ms: DEFAULT_PENDING_EVENT_TTL_MS,
            max_pending_events_per_handle: DEFAULT_MAX_PENDING_EVENTS_PER_HANDLE,
            max_pending_handles: DEFAULT_MAX_PENDING_HANDLES,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl ManagerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> DownloadResult<Self> {
        let config: ManagerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> DownloadResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DownloadError::InvalidConfig(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> DownloadResult<()> {
        if self.concurrency_limit == 0 {
            return Err(DownloadError::InvalidConfig(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(DownloadError::InvalidConfig(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_pending_events_per_handle == 0 || self.max_pending_handles == 0 {
            return Err(DownloadError::InvalidConfig(
                "pending event limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pending_event_ttl(&self) -> Duration {
        Duration::from_millis(self.pending_event_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.concurrency_limit, DEFAULT_CONCURRENCY_LIMIT);
        assert_eq!(config.pending_event_ttl(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ManagerConfig::from_toml_str(
            r#"
            concurrency_limit = 5
            network = "wifi_only"
            auto_convert_units = true
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.network, NetworkConstraint::WifiOnly);
        assert!(config.auto_convert_units);
        assert_eq!(config.event_channel_capacity, DEFAULT_EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_invalid_values() {
        let err = ManagerConfig::from_toml_str("concurrency_limit = 0").unwrap_err();
        assert_eq!(err.code(), "invalid_config");

        let err = ManagerConfig::from_toml_str("network = \"satellite\"").unwrap_err();
        assert!(matches!(err, DownloadError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pending_event_ttl_ms = 250").unwrap();

        let config = ManagerConfig::load(file.path()).unwrap();
        assert_eq!(config.pending_event_ttl(), Duration::from_millis(250));

        let missing = ManagerConfig::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(DownloadError::InvalidConfig(_))));
    }
}
