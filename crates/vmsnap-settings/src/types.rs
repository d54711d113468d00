//! Settings type definitions.
//!
//! All types use camelCase JSON and implement [`Default`] with production
//! values; `#[serde(default)]` lets a settings file name only what it
//! overrides.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vmsnap_core::SnapshotMode;

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VmSnapSettings {
    /// Settings schema version.
    pub version: String,
    /// Which snapshot path(s) to use.
    pub snapshot_mode: SnapshotMode,
    /// Whether the filesystem is frozen around the snapshot.
    pub freeze_enabled: bool,
    /// Delay between a fully failed guest attempt and the host retry.
    pub guest_to_host_settle_secs: u64,
    /// Override for the strategy flag file; defaults to `~/.vmsnap/strategy.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_store_path: Option<String>,
    /// Guest (per-disk blob call) settings.
    pub guest: GuestSettings,
    /// Host broker settings.
    pub host: HostSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for VmSnapSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            snapshot_mode: SnapshotMode::default(),
            freeze_enabled: true,
            guest_to_host_settle_secs: 60,
            strategy_store_path: None,
            guest: GuestSettings::default(),
            host: HostSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl VmSnapSettings {
    pub fn strategy_store_path(&self) -> PathBuf {
        match &self.strategy_store_path {
            Some(path) => PathBuf::from(path),
            None => crate::loader::settings_dir().join("strategy.json"),
        }
    }

    pub fn guest_to_host_settle(&self) -> Duration {
        Duration::from_secs(self.guest_to_host_settle_secs)
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.guest.blob_request_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "guest.blobRequestTimeoutSecs must be > 0".into(),
            ));
        }
        if self.host.request_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "host.requestTimeoutSecs must be > 0".into(),
            ));
        }
        if self.host.host_ip.trim().is_empty() {
            return Err(SettingsError::InvalidValue("host.hostIp is empty".into()));
        }
        Ok(())
    }
}

/// Settings for the guest path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuestSettings {
    /// Requests with at most this many disks always run sequentially.
    pub sequential_threshold: usize,
    /// Bound on waiting for parallel workers. `None` waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_timeout_secs: Option<u64>,
    /// Pool start-up slower than this marks the next run sequential.
    pub slow_start_threshold_secs: u64,
    /// Per blob snapshot HTTP call timeout.
    pub blob_request_timeout_secs: u64,
}

impl Default for GuestSettings {
    fn default() -> Self {
        Self {
            sequential_threshold: 4,
            join_timeout_secs: None,
            slow_start_threshold_secs: 10,
            blob_request_timeout_secs: 10,
        }
    }
}

impl GuestSettings {
    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_secs.map(Duration::from_secs)
    }

    pub fn slow_start_threshold(&self) -> Duration {
        Duration::from_secs(self.slow_start_threshold_secs)
    }

    pub fn blob_request_timeout(&self) -> Duration {
        Duration::from_secs(self.blob_request_timeout_secs)
    }
}

/// Settings for the host-delegated path.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSettings {
    /// Address of the host broker (wire server).
    pub host_ip: String,
    /// Timeout for presnapshot/dosnapshot calls.
    pub request_timeout_secs: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            host_ip: "168.63.129.16".to_string(),
            request_timeout_secs: 600,
        }
    }
}

impl HostSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}
