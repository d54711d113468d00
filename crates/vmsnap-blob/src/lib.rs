pub mod client;
pub mod worker;

pub mod mock;

pub use client::{BlobSnapshotClient, BlobSnapshotResponse, SNAPSHOT_HEADER};
pub use mock::{MockOutcome, MockSnapshotter};
pub use worker::{report_from_call, DiskSnapshotter, GuestDiskSnapshotWorker};
