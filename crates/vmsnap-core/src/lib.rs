//! Shared types for the multi-disk snapshot orchestrator: the request and
//! per-disk result model, the error taxonomy, and the seams (`Freezer`,
//! `StrategyStore`) the engine is driven through.

pub mod encryption;
pub mod errors;
pub mod freezer;
pub mod mode;
pub mod request;
pub mod snapshot;
pub mod strategy;

pub use encryption::{EncryptionDetails, EncryptionState};
pub use errors::{BlobCallError, SnapshotErrorCode, StoreError};
pub use freezer::{FreezeResult, Freezer, NoopFreezer, ThawResult};
pub use mode::SnapshotMode;
pub use request::{DiskTarget, MetadataTag, SnapshotRequest};
pub use snapshot::{
    BlobSnapshotInfo, DifferentialSnapshotIdentifier, RunOutcome, SnapshotError, SnapshotInfo,
    SnapshotResult, WorkerReport, NOT_ATTEMPTED_STATUS, TRANSPORT_FAILURE_STATUS,
};
pub use strategy::{StrategyOverride, StrategyStore, SEQ_SNAPSHOT_KEY};
