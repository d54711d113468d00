use serde::{Deserialize, Serialize};

use crate::errors::SnapshotErrorCode;

/// Status held by a result slot before its disk has been attempted.
pub const NOT_ATTEMPTED_STATUS: u16 = 500;

/// Status recorded when the HTTP call produced no response at all.
pub const TRANSPORT_FAILURE_STATUS: u16 = 0;

/// Identifier of a differential-disk snapshot returned by the host path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferentialSnapshotIdentifier {
    /// Milliseconds since the Unix epoch, UTC.
    pub creation_time_utc_ticks: i64,
    pub id: String,
    pub token: String,
}

/// Per-disk outcome. One per requested disk, pre-allocated as "not
/// attempted" and overwritten exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobSnapshotInfo {
    pub is_successful: bool,
    pub snapshot_uri: Option<String>,
    pub error_message: Option<String>,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dd_snapshot_identifier: Option<DifferentialSnapshotIdentifier>,
}

impl BlobSnapshotInfo {
    pub fn not_attempted() -> Self {
        Self {
            is_successful: false,
            snapshot_uri: None,
            error_message: None,
            status_code: NOT_ATTEMPTED_STATUS,
            dd_snapshot_identifier: None,
        }
    }

    pub fn is_not_attempted(&self) -> bool {
        !self.is_successful && self.error_message.is_none() && self.status_code == NOT_ATTEMPTED_STATUS
    }
}

/// What a guest worker reports for its disk: `(originalIndex, isSuccessful,
/// snapshotTimestamp, errorMessage, statusCode)`. Serializable so it can
/// cross any task or process boundary as plain data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub index: usize,
    pub is_successful: bool,
    pub snapshot_timestamp: Option<String>,
    pub error_message: Option<String>,
    pub status_code: u16,
    /// Present when the disk failed; feeds the run's `SnapshotResult`.
    pub error: Option<SnapshotError>,
}

impl WorkerReport {
    pub fn succeeded(index: usize, status_code: u16, snapshot_timestamp: Option<String>, body: Option<String>) -> Self {
        Self {
            index,
            is_successful: true,
            snapshot_timestamp,
            error_message: body,
            status_code,
            error: None,
        }
    }

    pub fn failed(index: usize, status_code: u16, error_message: String, error: SnapshotError) -> Self {
        Self {
            index,
            is_successful: false,
            snapshot_timestamp: None,
            error_message: Some(error_message),
            status_code,
            error: Some(error),
        }
    }
}

/// One failed disk, or the thaw failure of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotError {
    pub code: SnapshotErrorCode,
    pub disk_url: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl SnapshotError {
    pub fn new(code: SnapshotErrorCode, disk_url: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            disk_url,
            message: message.into(),
        }
    }

    pub fn thaw_failed(errors: &[String]) -> Self {
        Self::new(SnapshotErrorCode::ThawFailed, None, errors.join("; "))
    }
}

/// Ordered run errors. Empty means total success.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub errors: Vec<SnapshotError>,
}

impl SnapshotResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, error: SnapshotError) {
        self.errors.push(error);
    }

    pub fn has_thaw_failure(&self) -> bool {
        self.errors.iter().any(|e| e.code.is_thaw_failure())
    }
}

impl std::fmt::Display for SnapshotResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for error in &self.errors {
            writeln!(
                f,
                "{:?} {} {}",
                error.code,
                error.disk_url.as_deref().unwrap_or("-"),
                error.message
            )?;
        }
        Ok(())
    }
}

/// Run-level booleans, computed once from the final per-disk array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub all_failed: bool,
    pub is_inconsistent: bool,
    pub unable_to_sleep: bool,
    pub all_snapshots_failed: bool,
}

/// Caller-facing view of a disk's outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub is_successful: bool,
    pub snapshot_uri: Option<String>,
    pub error_message: Option<String>,
}

impl From<&BlobSnapshotInfo> for SnapshotInfo {
    fn from(info: &BlobSnapshotInfo) -> Self {
        Self {
            is_successful: info.is_successful,
            snapshot_uri: info.snapshot_uri.clone(),
            error_message: info.error_message.clone(),
        }
    }
}
