//! Host-delegated snapshot path. The whole multi-disk operation is handed to
//! a broker on the host over two loopback HTTP calls: `presnapshot` to check
//! availability (and fetch disk-encryption details) and `dosnapshot` to run
//! freeze-snapshot-thaw for every disk at once.

pub mod client;
pub mod error;
pub mod redact;
pub mod ticks;
pub mod wire;

pub use client::{
    HostSnapshotClient, HostSnapshotOutcome, PreSnapshotOutcome, BROKER_NOT_RUNNING_STATUS,
    CONNECTION_FAILURE_STATUS, EMPTY_BODY_STATUS, LOCAL_EXCEPTION_STATUS,
};
pub use error::HostError;
pub use redact::redact_json;
pub use ticks::creation_time_to_ticks;
