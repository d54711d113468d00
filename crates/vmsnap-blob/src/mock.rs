use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use vmsnap_core::{BlobCallError, DiskTarget, MetadataTag, WorkerReport};

use crate::client::BlobSnapshotResponse;
use crate::worker::{report_from_call, DiskSnapshotter};

/// Pre-programmed outcome for one disk, for deterministic testing without
/// a storage endpoint.
#[derive(Clone, Debug)]
pub enum MockOutcome {
    /// The call succeeds with this status and snapshot token.
    Success { status: u16, token: String },
    /// Storage answers with a non-success status.
    Failure { status: u16, body: String },
    /// The request never gets a response.
    Transport(String),
    /// Wait a duration, then produce the inner outcome.
    Delay(Duration, Box<MockOutcome>),
    /// The worker task panics.
    Panic,
}

impl MockOutcome {
    pub fn success(token: &str) -> Self {
        Self::Success {
            status: 201,
            token: token.to_string(),
        }
    }

    pub fn failure(status: u16, body: &str) -> Self {
        Self::Failure {
            status,
            body: body.to_string(),
        }
    }

    pub fn delayed(delay: Duration, inner: MockOutcome) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Disk snapshotter whose outcomes are scripted per disk index. Unscripted
/// disks succeed with status 201 and token `ts-<index>`; a disk without a
/// URL fails the same way the real worker does.
#[derive(Default)]
pub struct MockSnapshotter {
    outcomes: HashMap<usize, MockOutcome>,
    call_count: AtomicUsize,
    calls: Mutex<Vec<usize>>,
}

impl MockSnapshotter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(mut self, index: usize, outcome: MockOutcome) -> Self {
        let _ = self.outcomes.insert(index, outcome);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Disk indices in the order their calls started.
    pub fn call_order(&self) -> Vec<usize> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, index: usize) -> usize {
        self.calls.lock().iter().filter(|i| **i == index).count()
    }
}

#[async_trait]
impl DiskSnapshotter for MockSnapshotter {
    async fn snapshot_disk(&self, index: usize, disk: &DiskTarget, _metadata: &[MetadataTag]) -> WorkerReport {
        let _ = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(index);

        if disk.blob_url.is_none() {
            return report_from_call(index, disk, Err(BlobCallError::MissingUrl));
        }

        let mut outcome = self
            .outcomes
            .get(&index)
            .cloned()
            .unwrap_or_else(|| MockOutcome::success(&format!("ts-{index}")));

        loop {
            outcome = match outcome {
                MockOutcome::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    *inner
                }
                MockOutcome::Success { status, token } => {
                    let resp = BlobSnapshotResponse {
                        status,
                        snapshot_timestamp: token,
                        body: String::new(),
                    };
                    return report_from_call(index, disk, Ok(resp));
                }
                MockOutcome::Failure { status, body } => {
                    return report_from_call(index, disk, Err(BlobCallError::Status { status, body }));
                }
                MockOutcome::Transport(msg) => {
                    return report_from_call(index, disk, Err(BlobCallError::Transport(msg)));
                }
                MockOutcome::Panic => panic!("mock snapshotter panicked on disk {index}"),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unscripted_disk_succeeds() {
        let mock = MockSnapshotter::new();
        let report = mock.snapshot_disk(2, &DiskTarget::new("https://a/b?sig=x"), &[]).await;
        assert!(report.is_successful);
        assert_eq!(report.snapshot_timestamp.as_deref(), Some("ts-2"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn scripted_failure_and_delay() {
        let mock = MockSnapshotter::new()
            .with_outcome(0, MockOutcome::failure(409, "SnapshotOperationRateExceeded"))
            .with_outcome(1, MockOutcome::delayed(Duration::from_millis(5), MockOutcome::success("late")));
        let disk = DiskTarget::new("https://a/b?sig=x");

        let first = mock.snapshot_disk(0, &disk, &[]).await;
        assert!(!first.is_successful);
        assert_eq!(first.status_code, 409);

        let second = mock.snapshot_disk(1, &disk, &[]).await;
        assert_eq!(second.snapshot_timestamp.as_deref(), Some("late"));
        assert_eq!(mock.call_order(), vec![0, 1]);
        assert_eq!(mock.calls_for(1), 1);
    }

    #[tokio::test]
    async fn missing_url_fails_without_script() {
        let mock = MockSnapshotter::new().with_outcome(0, MockOutcome::success("never"));
        let report = mock.snapshot_disk(0, &DiskTarget::default(), &[]).await;
        assert!(!report.is_successful);
        assert_eq!(report.status_code, vmsnap_core::NOT_ATTEMPTED_STATUS);
    }
}
