use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use vmsnap_core::{BlobCallError, DiskTarget, MetadataTag, SnapshotError, WorkerReport};

use crate::client::{BlobSnapshotClient, BlobSnapshotResponse};

/// Snapshots one disk. Implementations must never fail or panic on
/// per-disk problems: every outcome is folded into the returned report.
///
/// The same contract serves both strategies: awaited inline by the
/// sequential loop, or run as an isolated task by the parallel one.
#[async_trait]
pub trait DiskSnapshotter: Send + Sync + 'static {
    async fn snapshot_disk(&self, index: usize, disk: &DiskTarget, metadata: &[MetadataTag]) -> WorkerReport;
}

/// Guest-side worker backed by a real storage call.
#[derive(Clone, Debug)]
pub struct GuestDiskSnapshotWorker {
    client: BlobSnapshotClient,
}

impl GuestDiskSnapshotWorker {
    pub fn new(client: BlobSnapshotClient) -> Self {
        Self { client }
    }

    pub fn with_timeout(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self::new(BlobSnapshotClient::new(request_timeout)?))
    }
}

#[async_trait]
impl DiskSnapshotter for GuestDiskSnapshotWorker {
    async fn snapshot_disk(&self, index: usize, disk: &DiskTarget, metadata: &[MetadataTag]) -> WorkerReport {
        let started = Instant::now();
        let result = self
            .client
            .create_snapshot(disk.blob_url.as_deref(), metadata)
            .await;
        let report = report_from_call(index, disk, result);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if report.is_successful {
            info!(index, disk = disk.display_url(), status = report.status_code, elapsed_ms, "disk snapshot taken");
        } else {
            warn!(
                index,
                disk = disk.display_url(),
                status = report.status_code,
                elapsed_ms,
                error = report.error_message.as_deref().unwrap_or(""),
                "disk snapshot failed"
            );
        }
        report
    }
}

/// Normalize a snapshot call outcome into the report sent back to the
/// aggregator.
pub fn report_from_call(
    index: usize,
    disk: &DiskTarget,
    result: Result<BlobSnapshotResponse, BlobCallError>,
) -> WorkerReport {
    match result {
        Ok(resp) => {
            let body = (!resp.body.is_empty()).then_some(resp.body);
            WorkerReport::succeeded(index, resp.status, Some(resp.snapshot_timestamp), body)
        }
        Err(err) => {
            let error = SnapshotError::new(err.code(), disk.blob_url.clone(), err.to_string());
            WorkerReport::failed(index, err.status_code(), err.message(), error)
        }
    }
}

#[cfg(test)]
mod tests {
    use vmsnap_core::{SnapshotErrorCode, NOT_ATTEMPTED_STATUS};

    use super::*;

    #[test]
    fn success_report_carries_timestamp() {
        let disk = DiskTarget::new("https://a/b?sig=x");
        let report = report_from_call(
            3,
            &disk,
            Ok(BlobSnapshotResponse {
                status: 201,
                snapshot_timestamp: "TS1".into(),
                body: String::new(),
            }),
        );
        assert_eq!(report.index, 3);
        assert!(report.is_successful);
        assert_eq!(report.snapshot_timestamp.as_deref(), Some("TS1"));
        assert_eq!(report.status_code, 201);
        assert!(report.error_message.is_none());
        assert!(report.error.is_none());
    }

    #[test]
    fn failure_report_carries_error() {
        let disk = DiskTarget::new("https://a/b?sig=x");
        let report = report_from_call(
            1,
            &disk,
            Err(BlobCallError::Status {
                status: 403,
                body: "AuthorizationFailure".into(),
            }),
        );
        assert!(!report.is_successful);
        assert_eq!(report.status_code, 403);
        assert_eq!(report.error_message.as_deref(), Some("AuthorizationFailure"));
        let error = report.error.unwrap();
        assert_eq!(error.code, SnapshotErrorCode::Http(403));
        assert_eq!(error.disk_url.as_deref(), Some("https://a/b?sig=x"));
    }

    #[tokio::test]
    async fn missing_url_yields_failed_report() {
        let worker = GuestDiskSnapshotWorker::with_timeout(Duration::from_secs(1)).unwrap();
        let report = worker.snapshot_disk(0, &DiskTarget::default(), &[]).await;
        assert!(!report.is_successful);
        assert_eq!(report.status_code, NOT_ATTEMPTED_STATUS);
        assert!(!report.error_message.unwrap().is_empty());
        assert_eq!(report.error.unwrap().code, SnapshotErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn malformed_url_yields_failed_report() {
        let worker = GuestDiskSnapshotWorker::with_timeout(Duration::from_secs(1)).unwrap();
        let report = worker
            .snapshot_disk(2, &DiskTarget::new("::not-a-url::"), &[])
            .await;
        assert_eq!(report.index, 2);
        assert!(!report.is_successful);
        assert!(report.error_message.unwrap().contains("parse"));
    }
}
