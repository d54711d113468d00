use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};

use vmsnap_core::{
    BlobSnapshotInfo, Freezer, RunOutcome, SnapshotError, SnapshotErrorCode, SnapshotInfo, SnapshotMode,
    SnapshotRequest, SnapshotResult,
};
use vmsnap_host::{HostSnapshotClient, HostSnapshotOutcome};
use vmsnap_telemetry::{keys, RunTelemetry};

use crate::dispatcher::SnapshotDispatcher;
use crate::thaw::ThawGuard;

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(60);

const RATE_EXCEEDED_MESSAGE: &str = "The rate of snapshot blob calls is exceeded";
const LIMIT_REACHED_MESSAGE: &str = "The snapshot count against this blob has been exceeded";

/// Final classification of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Success,
    /// The request named no disks.
    NoBlobs,
    FsFreezeFailed,
    /// Thaw failed; the snapshots cannot be trusted to be consistent.
    Inconsistent,
    SnapshotRateExceeded,
    SnapshotLimitReached,
    /// No disk was snapshotted.
    SnapshotFailedNoNetwork,
    /// Some disks were snapshotted, some were not.
    SnapshotFailedRestrictedNetwork,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether the backup service should try the run again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::FsFreezeFailed
                | Self::SnapshotRateExceeded
                | Self::SnapshotFailedNoNetwork
                | Self::SnapshotFailedRestrictedNetwork
        )
    }
}

/// What a run reports back to the backup service.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorReport {
    pub status: RunStatus,
    pub snapshot_info: Vec<SnapshotInfo>,
    pub blob_snapshot_info: Vec<BlobSnapshotInfo>,
    pub outcome: RunOutcome,
    pub errors: SnapshotResult,
    pub telemetry: RunTelemetry,
}

/// Outcome of one path (guest or host).
#[derive(Debug, Default)]
struct Attempt {
    /// Set when the run stopped before any snapshot was taken.
    early_status: Option<RunStatus>,
    infos: Vec<BlobSnapshotInfo>,
    outcome: RunOutcome,
    errors: SnapshotResult,
}

impl Attempt {
    fn stopped(status: RunStatus) -> Self {
        Self {
            early_status: Some(status),
            ..Default::default()
        }
    }

    fn every_snapshot_failed(&self) -> bool {
        self.early_status.is_none() && self.outcome.all_snapshots_failed
    }
}

/// Chooses between the guest and host snapshot paths per `SnapshotMode`
/// and owns the freeze for each attempt.
pub struct SnapshotCoordinator {
    dispatcher: SnapshotDispatcher,
    host: HostSnapshotClient,
    mode: SnapshotMode,
    settle_delay: Duration,
    telemetry: RunTelemetry,
}

impl SnapshotCoordinator {
    pub fn new(dispatcher: SnapshotDispatcher, host: HostSnapshotClient, mode: SnapshotMode, telemetry: RunTelemetry) -> Self {
        Self {
            dispatcher,
            host,
            mode,
            settle_delay: DEFAULT_SETTLE_DELAY,
            telemetry,
        }
    }

    /// Delay between a fully failed guest attempt and the host retry.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[instrument(skip_all, fields(task_id = %request.task_id))]
    pub async fn run(&self, request: &SnapshotRequest, freezer: &dyn Freezer) -> CoordinatorReport {
        let mode = if request.is_any_disk_excluded {
            if self.mode != SnapshotMode::OnlyGuest {
                info!(configured = %self.mode, "some disks are excluded, using guest snapshots only");
            }
            SnapshotMode::OnlyGuest
        } else {
            self.mode
        };
        info!(%mode, disks = request.disk_count(), "snapshot requested");

        let attempt = match mode {
            SnapshotMode::OnlyGuest => self.take_from_guest(request, freezer).await,
            SnapshotMode::OnlyHost => self.take_from_host(request, freezer).await,
            SnapshotMode::FirstGuestThenHost => {
                let guest = self.take_from_guest(request, freezer).await;
                if guest.every_snapshot_failed() {
                    info!(
                        settle_secs = self.settle_delay.as_secs(),
                        "every guest snapshot failed, retrying through host"
                    );
                    tokio::time::sleep(self.settle_delay).await;
                    self.take_from_host(request, freezer).await
                } else {
                    guest
                }
            }
            SnapshotMode::FirstHostThenGuest => {
                let pre = self
                    .host
                    .pre_snapshot(request, request.is_vm_ade_enabled())
                    .await;
                if pre.is_success() {
                    let request = match pre.encryption {
                        Some(encryption) => request.with_encryption(encryption),
                        None => request.clone(),
                    };
                    self.snapshot_through_host(&request, freezer).await
                } else {
                    info!(status = pre.status_code, "host broker unavailable, using guest snapshots");
                    self.take_from_guest(request, freezer).await
                }
            }
        };

        let status = classify(&attempt);
        info!(?status, "snapshot run classified");
        CoordinatorReport {
            status,
            snapshot_info: attempt.infos.iter().map(SnapshotInfo::from).collect(),
            blob_snapshot_info: attempt.infos,
            outcome: attempt.outcome,
            errors: attempt.errors,
            telemetry: self.telemetry.clone(),
        }
    }

    async fn take_from_guest(&self, request: &SnapshotRequest, freezer: &dyn Freezer) -> Attempt {
        if request.disks.is_empty() {
            warn!("no disks to snapshot");
            return Attempt::stopped(RunStatus::NoBlobs);
        }
        self.telemetry
            .record(keys::SNAPSHOT_CREATOR, keys::CREATOR_GUEST);
        if !self.freeze(freezer).await {
            return Attempt::stopped(RunStatus::FsFreezeFailed);
        }

        let (errors, infos, outcome) = self.dispatcher.snapshot_all(request, freezer).await;
        Attempt {
            early_status: None,
            infos,
            outcome,
            errors,
        }
    }

    /// Host path without a prior probe. ADE-enabled VMs still need the
    /// broker's encryption state before the snapshot call.
    async fn take_from_host(&self, request: &SnapshotRequest, freezer: &dyn Freezer) -> Attempt {
        if request.is_vm_ade_enabled() {
            let pre = self.host.pre_snapshot(request, true).await;
            if let Some(encryption) = pre.encryption {
                return self
                    .snapshot_through_host(&request.with_encryption(encryption), freezer)
                    .await;
            }
        }
        self.snapshot_through_host(request, freezer).await
    }

    async fn snapshot_through_host(&self, request: &SnapshotRequest, freezer: &dyn Freezer) -> Attempt {
        self.telemetry
            .record(keys::SNAPSHOT_CREATOR, keys::CREATOR_HOST);
        if !self.freeze(freezer).await {
            return Attempt::stopped(RunStatus::FsFreezeFailed);
        }

        let freeze_held = self.dispatcher.config().freeze_enabled;
        let host = self
            .host
            .do_snapshot(request, freeze_held.then_some(freezer))
            .await;
        host_attempt(host)
    }

    /// Freeze for one attempt. On failure whatever was frozen is released
    /// before returning `false`.
    async fn freeze(&self, freezer: &dyn Freezer) -> bool {
        if !self.dispatcher.config().freeze_enabled {
            return true;
        }
        let started = Instant::now();
        let result = freezer.freeze().await;
        self.telemetry
            .record_duration(keys::FREEZE_TIME, started.elapsed());
        if result.is_ok() {
            return true;
        }

        warn!(errors = ?result.errors, "filesystem freeze failed");
        let guard = ThawGuard::new(freezer, true);
        if let Some(thaw) = guard.thaw_once().await {
            if !thaw.is_ok() {
                warn!(errors = ?thaw.errors, "thaw after failed freeze also failed");
            }
        }
        false
    }
}

fn host_attempt(host: HostSnapshotOutcome) -> Attempt {
    let mut errors = SnapshotResult::default();
    if !host.thaw_errors.is_empty() {
        errors.push(SnapshotError::thaw_failed(&host.thaw_errors));
    }
    for info in host.infos.iter().filter(|i| !i.is_successful) {
        errors.push(SnapshotError::new(
            SnapshotErrorCode::Http(info.status_code),
            info.snapshot_uri.clone(),
            info.error_message.clone().unwrap_or_default(),
        ));
    }
    if host.infos.is_empty() {
        errors.push(SnapshotError::new(
            SnapshotErrorCode::Http(host.status_code),
            None,
            format!("host snapshot returned no disks (status {})", host.status_code),
        ));
    }
    Attempt {
        early_status: None,
        infos: host.infos,
        outcome: host.outcome,
        errors,
    }
}

fn classify(attempt: &Attempt) -> RunStatus {
    if let Some(status) = attempt.early_status {
        return status;
    }
    if attempt.outcome.is_inconsistent {
        return RunStatus::Inconsistent;
    }
    for message in attempt.infos.iter().filter_map(|i| i.error_message.as_deref()) {
        if message.contains(RATE_EXCEEDED_MESSAGE) {
            return RunStatus::SnapshotRateExceeded;
        }
        if message.contains(LIMIT_REACHED_MESSAGE) {
            return RunStatus::SnapshotLimitReached;
        }
    }
    if attempt.outcome.all_failed {
        return RunStatus::SnapshotFailedNoNetwork;
    }
    if attempt.infos.iter().any(|i| !i.is_successful) {
        return RunStatus::SnapshotFailedRestrictedNetwork;
    }
    RunStatus::Success
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::extract::State;
    use axum::http::{StatusCode, Uri};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::Router;
    use parking_lot::Mutex;
    use vmsnap_blob::{MockOutcome, MockSnapshotter};
    use vmsnap_core::{DiskTarget, EncryptionState, FreezeResult, ThawResult};

    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use crate::strategy::MemoryStrategyStore;

    #[derive(Default)]
    struct CountingFreezer {
        freezes: AtomicUsize,
        thaws: AtomicUsize,
        freeze_errors: Vec<String>,
        thaw_errors: Vec<String>,
    }

    impl CountingFreezer {
        fn counts(&self) -> (usize, usize) {
            (self.freezes.load(Ordering::SeqCst), self.thaws.load(Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl Freezer for CountingFreezer {
        async fn freeze(&self) -> FreezeResult {
            let _ = self.freezes.fetch_add(1, Ordering::SeqCst);
            FreezeResult {
                errors: self.freeze_errors.clone(),
            }
        }

        async fn thaw(&self) -> ThawResult {
            let _ = self.thaws.fetch_add(1, Ordering::SeqCst);
            ThawResult {
                errors: self.thaw_errors.clone(),
                unable_to_sleep: false,
            }
        }
    }

    #[derive(Clone)]
    struct FakeBroker {
        pre: (u16, &'static str),
        dosnapshot: (u16, &'static str),
        paths: Arc<Mutex<Vec<String>>>,
    }

    async fn broker_handler(State(fake): State<FakeBroker>, uri: Uri) -> Response {
        let path = uri.path().to_string();
        let (status, body) = if path.ends_with("/presnapshot") {
            fake.pre
        } else {
            fake.dosnapshot
        };
        fake.paths.lock().push(path);
        (StatusCode::from_u16(status).unwrap(), body).into_response()
    }

    async fn spawn_broker(pre: (u16, &'static str), dosnapshot: (u16, &'static str)) -> (String, Arc<Mutex<Vec<String>>>) {
        let paths = Arc::new(Mutex::new(Vec::new()));
        let fake = FakeBroker {
            pre,
            dosnapshot,
            paths: Arc::clone(&paths),
        };
        let app = Router::new()
            .route("/metadata/recsvc/snapshot/presnapshot", post(broker_handler))
            .route("/metadata/recsvc/snapshot/dosnapshot", post(broker_handler))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        }));
        (addr.to_string(), paths)
    }

    async fn unreachable_host() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    const HOST_TWO_DISKS: &str = r#"{"snapshotInfo": [
        {"isSuccessful": true, "snapshotUri": "https://acct/vhds/d0?snapshot=h0", "errorMessage": null, "statusCode": 201},
        {"isSuccessful": true, "snapshotUri": "https://acct/vhds/d1?snapshot=h1", "errorMessage": null, "statusCode": 201}
    ]}"#;

    fn request(n: usize) -> SnapshotRequest {
        let disks = (0..n)
            .map(|i| DiskTarget::new(format!("https://acct/vhds/d{i}?sig=x")))
            .collect();
        SnapshotRequest::new("task-1", disks)
    }

    fn coordinator(mock: Arc<MockSnapshotter>, host: &str, mode: SnapshotMode) -> SnapshotCoordinator {
        let telemetry = RunTelemetry::new();
        let dispatcher = SnapshotDispatcher::new(mock, Arc::new(MemoryStrategyStore::new()), DispatcherConfig::default())
            .with_telemetry(telemetry.clone());
        let host = HostSnapshotClient::new(host, Duration::from_secs(5), telemetry.clone()).unwrap();
        SnapshotCoordinator::new(dispatcher, host, mode, telemetry).with_settle_delay(Duration::ZERO)
    }

    fn failing_guest(n: usize, body: &str) -> Arc<MockSnapshotter> {
        let mut mock = MockSnapshotter::new();
        for i in 0..n {
            mock = mock.with_outcome(i, MockOutcome::failure(409, body));
        }
        Arc::new(mock)
    }

    #[tokio::test]
    async fn guest_only_success() {
        let host = unreachable_host().await;
        let freezer = CountingFreezer::default();
        let report = coordinator(Arc::new(MockSnapshotter::new()), &host, SnapshotMode::OnlyGuest)
            .run(&request(2), &freezer)
            .await;
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.snapshot_info.len(), 2);
        assert!(report.snapshot_info.iter().all(|i| i.is_successful));
        assert_eq!(report.telemetry.get(keys::SNAPSHOT_CREATOR).as_deref(), Some("guestExtension"));
        assert!(report.telemetry.get(keys::FREEZE_TIME).is_some());
        assert_eq!(freezer.counts(), (1, 1));
    }

    #[tokio::test]
    async fn excluded_disks_force_guest() {
        let host = unreachable_host().await;
        let mock = Arc::new(MockSnapshotter::new());
        let mut req = request(2);
        req.is_any_disk_excluded = true;

        let report = coordinator(Arc::clone(&mock), &host, SnapshotMode::OnlyHost)
            .run(&req, &CountingFreezer::default())
            .await;
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(report.telemetry.get(keys::SNAPSHOT_CREATOR).as_deref(), Some("guestExtension"));
    }

    #[tokio::test]
    async fn no_disks_never_freezes() {
        let host = unreachable_host().await;
        let freezer = CountingFreezer::default();
        let report = coordinator(Arc::new(MockSnapshotter::new()), &host, SnapshotMode::OnlyGuest)
            .run(&request(0), &freezer)
            .await;
        assert_eq!(report.status, RunStatus::NoBlobs);
        assert!(report.snapshot_info.is_empty());
        assert_eq!(freezer.counts(), (0, 0));
    }

    #[tokio::test]
    async fn freeze_failure_releases_and_skips_snapshots() {
        let host = unreachable_host().await;
        let mock = Arc::new(MockSnapshotter::new());
        let freezer = CountingFreezer {
            freeze_errors: vec!["freeze /data: busy".into()],
            ..Default::default()
        };
        let report = coordinator(Arc::clone(&mock), &host, SnapshotMode::OnlyGuest)
            .run(&request(3), &freezer)
            .await;
        assert_eq!(report.status, RunStatus::FsFreezeFailed);
        assert!(report.status.is_retryable());
        assert_eq!(mock.call_count(), 0);
        assert_eq!(freezer.counts(), (1, 1));
    }

    #[tokio::test]
    async fn rate_exceeded_is_detected() {
        let host = unreachable_host().await;
        let mock = Arc::new(MockSnapshotter::new().with_outcome(
            1,
            MockOutcome::failure(503, "The rate of snapshot blob calls is exceeded."),
        ));
        let report = coordinator(mock, &host, SnapshotMode::OnlyGuest)
            .run(&request(3), &CountingFreezer::default())
            .await;
        assert_eq!(report.status, RunStatus::SnapshotRateExceeded);
    }

    #[tokio::test]
    async fn snapshot_limit_is_detected() {
        let host = unreachable_host().await;
        let mock = Arc::new(MockSnapshotter::new().with_outcome(
            0,
            MockOutcome::failure(409, "The snapshot count against this blob has been exceeded."),
        ));
        let report = coordinator(mock, &host, SnapshotMode::OnlyGuest)
            .run(&request(2), &CountingFreezer::default())
            .await;
        assert_eq!(report.status, RunStatus::SnapshotLimitReached);
        assert!(!report.status.is_retryable());
    }

    #[tokio::test]
    async fn partial_and_total_failures() {
        let host = unreachable_host().await;
        let partial = Arc::new(MockSnapshotter::new().with_outcome(1, MockOutcome::failure(403, "denied")));
        let report = coordinator(partial, &host, SnapshotMode::OnlyGuest)
            .run(&request(2), &CountingFreezer::default())
            .await;
        assert_eq!(report.status, RunStatus::SnapshotFailedRestrictedNetwork);

        let report = coordinator(failing_guest(2, "denied"), &host, SnapshotMode::OnlyGuest)
            .run(&request(2), &CountingFreezer::default())
            .await;
        assert_eq!(report.status, RunStatus::SnapshotFailedNoNetwork);
        assert!(report.outcome.all_failed);
    }

    #[tokio::test]
    async fn thaw_failure_is_inconsistent() {
        let host = unreachable_host().await;
        let freezer = CountingFreezer {
            thaw_errors: vec!["unfreeze / failed".into()],
            ..Default::default()
        };
        let report = coordinator(Arc::new(MockSnapshotter::new()), &host, SnapshotMode::OnlyGuest)
            .run(&request(2), &freezer)
            .await;
        assert_eq!(report.status, RunStatus::Inconsistent);
        assert_eq!(report.errors.errors[0].code, SnapshotErrorCode::ThawFailed);
    }

    #[tokio::test]
    async fn guest_failure_falls_back_to_host() {
        let (host, paths) = spawn_broker((200, "{}"), (200, HOST_TWO_DISKS)).await;
        let freezer = CountingFreezer::default();
        let report = coordinator(failing_guest(2, "denied"), &host, SnapshotMode::FirstGuestThenHost)
            .run(&request(2), &freezer)
            .await;
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.snapshot_info[1].snapshot_uri.as_deref(), Some("https://acct/vhds/d1?snapshot=h1"));
        assert_eq!(report.telemetry.get(keys::SNAPSHOT_CREATOR).as_deref(), Some("backupHostService"));
        assert_eq!(paths.lock().as_slice(), ["/metadata/recsvc/snapshot/dosnapshot"]);
        assert_eq!(freezer.counts(), (2, 2));
    }

    #[tokio::test]
    async fn guest_success_skips_host() {
        let (host, paths) = spawn_broker((200, "{}"), (200, HOST_TWO_DISKS)).await;
        let report = coordinator(Arc::new(MockSnapshotter::new()), &host, SnapshotMode::FirstGuestThenHost)
            .run(&request(2), &CountingFreezer::default())
            .await;
        assert_eq!(report.status, RunStatus::Success);
        assert!(paths.lock().is_empty());
    }

    #[tokio::test]
    async fn host_first_when_broker_available() {
        let (host, paths) = spawn_broker((200, "{}"), (200, HOST_TWO_DISKS)).await;
        let mock = Arc::new(MockSnapshotter::new());
        let freezer = CountingFreezer::default();
        let report = coordinator(Arc::clone(&mock), &host, SnapshotMode::FirstHostThenGuest)
            .run(&request(2), &freezer)
            .await;
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(mock.call_count(), 0);
        assert_eq!(
            paths.lock().as_slice(),
            ["/metadata/recsvc/snapshot/presnapshot", "/metadata/recsvc/snapshot/dosnapshot"]
        );
        assert_eq!(report.telemetry.get(keys::HOST_STATUS_PRE_SNAPSHOT).as_deref(), Some("200"));
        assert_eq!(freezer.counts(), (1, 1));
    }

    #[tokio::test]
    async fn guest_when_broker_not_running() {
        let (host, paths) = spawn_broker((500, "Internal Server Error"), (200, HOST_TWO_DISKS)).await;
        let mock = Arc::new(MockSnapshotter::new());
        let report = coordinator(Arc::clone(&mock), &host, SnapshotMode::FirstHostThenGuest)
            .run(&request(2), &CountingFreezer::default())
            .await;
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(paths.lock().len(), 1);
        assert_eq!(report.telemetry.get(keys::HOST_STATUS_PRE_SNAPSHOT).as_deref(), Some("556"));
    }

    #[tokio::test]
    async fn host_only_empty_body_fails() {
        let (host, _) = spawn_broker((200, "{}"), (200, "")).await;
        let freezer = CountingFreezer::default();
        let report = coordinator(Arc::new(MockSnapshotter::new()), &host, SnapshotMode::OnlyHost)
            .run(&request(2), &freezer)
            .await;
        assert_eq!(report.status, RunStatus::SnapshotFailedNoNetwork);
        assert_eq!(report.telemetry.get(keys::HOST_STATUS_DO_SNAPSHOT).as_deref(), Some("557"));
        assert_eq!(report.errors.errors.len(), 1);
        assert_eq!(freezer.counts(), (1, 1));
    }

    #[tokio::test]
    async fn host_only_fetches_encryption_for_ade_vms() {
        let (host, paths) = spawn_broker(
            (200, r#"{"isOsDiskADEEncrypted": true, "areDataDisksADEEncrypted": true, "encryptionDetails": {}}"#),
            (200, HOST_TWO_DISKS),
        )
        .await;
        let req = request(2).with_encryption(EncryptionState {
            is_vm_ade_enabled: true,
            ..Default::default()
        });
        let report = coordinator(Arc::new(MockSnapshotter::new()), &host, SnapshotMode::OnlyHost)
            .run(&req, &CountingFreezer::default())
            .await;
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(paths.lock().len(), 2);
    }

    #[tokio::test]
    async fn report_serializes_for_the_caller() {
        let host = unreachable_host().await;
        let report = coordinator(Arc::new(MockSnapshotter::new()), &host, SnapshotMode::OnlyGuest)
            .run(&request(1), &CountingFreezer::default())
            .await;
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["snapshotInfo"][0]["isSuccessful"], true);
        assert_eq!(json["telemetry"]["snapshotCreator"], "guestExtension");
        assert_eq!(json["outcome"]["allFailed"], false);
    }
}
