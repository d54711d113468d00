//! Settings loading: compiled defaults, overlaid by the JSON settings file,
//! then by `VMSNAP_*` environment variables.

use std::io::ErrorKind;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, VmSnapSettings};

/// Directory holding settings and the strategy flag (`~/.vmsnap`).
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vmsnap")
}

/// Resolve the path to the settings file (`~/.vmsnap/settings.json`).
pub fn settings_path() -> PathBuf {
    settings_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VmSnapSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. An unreadable file, invalid JSON, or a
/// merged value that fails validation is an error.
pub fn load_settings_from_path(path: &Path) -> Result<VmSnapSettings> {
    let mut merged = serde_json::to_value(VmSnapSettings::default())?;

    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(?path, "loading settings from file");
            let overlay: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            deep_merge(&mut merged, overlay);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(?path, "settings file not found, using defaults");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    let mut settings: VmSnapSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Merge `overlay` into `base`. Objects merge key by key, nulls in the
/// overlay leave `base` untouched, anything else replaces.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None if !value.is_null() => {
                        let _ = base.insert(key, value);
                    }
                    None => {}
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `VMSNAP_*` overrides. A value that does not parse is ignored with
/// a warning and the file/default value is kept.
pub fn apply_env_overrides(settings: &mut VmSnapSettings) {
    if let Some(ip) = env_override("VMSNAP_HOST_IP", |v| Some(v.to_string())) {
        settings.host.host_ip = ip;
    }
    if let Some(secs) = env_override("VMSNAP_HOST_TIMEOUT_SECS", |v| parse_in_range(v, 1..=3600)) {
        settings.host.request_timeout_secs = secs;
    }
    if let Some(mode) = env_override("VMSNAP_SNAPSHOT_MODE", |v| v.parse().ok()) {
        settings.snapshot_mode = mode;
    }
    if let Some(n) = env_override("VMSNAP_SEQUENTIAL_THRESHOLD", |v| parse_in_range(v, 0..=1024)) {
        settings.guest.sequential_threshold = n;
    }
    if let Some(secs) = env_override("VMSNAP_JOIN_TIMEOUT_SECS", |v| parse_in_range(v, 1..=86_400)) {
        settings.guest.join_timeout_secs = Some(secs);
    }
    if let Some(secs) = env_override("VMSNAP_BLOB_TIMEOUT_SECS", |v| parse_in_range(v, 1..=3600)) {
        settings.guest.blob_request_timeout_secs = secs;
    }
    if let Some(path) = env_override("VMSNAP_STRATEGY_STORE", |v| Some(v.to_string())) {
        settings.strategy_store_path = Some(path);
    }
    if let Some(enabled) = env_override("VMSNAP_FREEZE_ENABLED", parse_bool) {
        settings.freeze_enabled = enabled;
    }
    if let Some(format) = env_override("VMSNAP_LOG_FORMAT", parse_log_format) {
        settings.logging.format = format;
    }
}

fn env_override<T>(name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = parse(raw);
    if parsed.is_none() {
        warn!(key = name, value = raw, "ignoring invalid environment override");
    }
    parsed
}

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_in_range<T: FromStr + PartialOrd>(val: &str, range: RangeInclusive<T>) -> Option<T> {
    val.parse().ok().filter(|n| range.contains(n))
}

pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "text" | "pretty" => Some(LogFormat::Text),
        _ => None,
    }
}
