use serde::{Deserialize, Serialize};

use crate::snapshot::{NOT_ATTEMPTED_STATUS, TRANSPORT_FAILURE_STATUS};

/// Why a single blob snapshot call did not succeed.
/// Never raised past the worker boundary; always folded into that disk's result.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BlobCallError {
    // Rejected before reaching the wire
    #[error("blob url is missing")]
    MissingUrl,
    #[error("failed to parse blob url: {0}")]
    InvalidUrl(String),
    #[error("invalid metadata header: {0}")]
    InvalidMetadata(String),

    // Reached (or tried to reach) the wire
    #[error("transport error: {0}")]
    Transport(String),
    #[error("storage returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("storage returned {status} without an x-ms-snapshot header")]
    MissingSnapshotHeader { status: u16 },
}

impl BlobCallError {
    /// Status code recorded in the disk's result slot.
    ///
    /// Calls that never left the guest keep the "not attempted" sentinel;
    /// transport failures get their own sentinel so they cannot be confused
    /// with a storage-side 5xx.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingUrl | Self::InvalidUrl(_) | Self::InvalidMetadata(_) => {
                NOT_ATTEMPTED_STATUS
            }
            Self::Transport(_) => TRANSPORT_FAILURE_STATUS,
            Self::Status { status, .. } | Self::MissingSnapshotHeader { status } => *status,
        }
    }

    /// Text stored as the slot's `error_message`: the response body for HTTP
    /// failures that carried one, the error description otherwise.
    pub fn message(&self) -> String {
        match self {
            Self::Status { body, .. } if !body.is_empty() => body.clone(),
            other => other.to_string(),
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingUrl => "missing_url",
            Self::InvalidUrl(_) => "invalid_url",
            Self::InvalidMetadata(_) => "invalid_metadata",
            Self::Transport(_) => "transport",
            Self::Status { .. } => "http_status",
            Self::MissingSnapshotHeader { .. } => "missing_snapshot_header",
        }
    }

    pub fn code(&self) -> SnapshotErrorCode {
        match self {
            Self::MissingUrl | Self::InvalidUrl(_) | Self::InvalidMetadata(_) => {
                SnapshotErrorCode::InvalidRequest
            }
            Self::Transport(_) => SnapshotErrorCode::Transport,
            Self::Status { status, .. } => SnapshotErrorCode::Http(*status),
            Self::MissingSnapshotHeader { .. } => SnapshotErrorCode::MalformedResponse,
        }
    }
}

/// Code attached to each entry of a `SnapshotResult`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "status")]
pub enum SnapshotErrorCode {
    /// The storage service answered with a non-success status.
    Http(u16),
    /// The request never produced a response.
    Transport,
    /// The disk's URL or metadata could not be turned into a request.
    InvalidRequest,
    /// A success status arrived without the snapshot timestamp.
    MalformedResponse,
    /// A worker never reported back (panic, abort, join timeout).
    Abandoned,
    /// Thawing the filesystem failed; the run's consistency is compromised.
    ThawFailed,
}

impl SnapshotErrorCode {
    pub fn is_thaw_failure(&self) -> bool {
        matches!(self, Self::ThawFailed)
    }
}

/// Failures of the persisted strategy flag store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
