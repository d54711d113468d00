use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{info, instrument, warn};

use vmsnap_blob::DiskSnapshotter;
use vmsnap_core::{
    BlobSnapshotInfo, Freezer, MetadataTag, RunOutcome, SnapshotRequest, SnapshotResult, StrategyStore,
    ThawResult,
};
use vmsnap_telemetry::{keys, RunTelemetry};

use crate::aggregator::ResultAggregator;
use crate::error::EngineError;
use crate::pool::{IndexedReport, TokioWorkerPool, WorkerPool, WorkerTask};
use crate::strategy::{Strategy, StrategySelector};
use crate::thaw::ThawGuard;

const DEFAULT_SEQUENTIAL_THRESHOLD: usize = 4;
const DEFAULT_SLOW_START_THRESHOLD: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Requests with at most this many disks run sequentially.
    pub sequential_threshold: usize,
    /// Upper bound on waiting for the parallel task group. `None` waits
    /// for every task however long it takes.
    pub join_timeout: Option<Duration>,
    /// Starting the task group slower than this makes the next run sequential.
    pub slow_start_threshold: Duration,
    /// Whether the caller holds a filesystem freeze that must be released.
    pub freeze_enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            sequential_threshold: DEFAULT_SEQUENTIAL_THRESHOLD,
            join_timeout: None,
            slow_start_threshold: DEFAULT_SLOW_START_THRESHOLD,
            freeze_enabled: true,
        }
    }
}

struct ParallelAttempt {
    slow_start: bool,
    result: Result<(), EngineError>,
}

/// Runs every disk of a request under the chosen strategy and owns the
/// thaw boundary for the run.
pub struct SnapshotDispatcher {
    worker: Arc<dyn DiskSnapshotter>,
    selector: StrategySelector,
    pool: Arc<dyn WorkerPool>,
    config: DispatcherConfig,
    telemetry: RunTelemetry,
}

impl SnapshotDispatcher {
    pub fn new(worker: Arc<dyn DiskSnapshotter>, store: Arc<dyn StrategyStore>, config: DispatcherConfig) -> Self {
        Self {
            worker,
            selector: StrategySelector::new(store, config.sequential_threshold),
            pool: Arc::new(TokioWorkerPool),
            config,
            telemetry: RunTelemetry::new(),
        }
    }

    pub fn with_pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_telemetry(mut self, telemetry: RunTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    /// Snapshot every disk of `request` while the caller holds the freeze,
    /// then thaw exactly once. The returned array always has one entry per
    /// requested disk, in request order.
    #[instrument(skip_all, fields(task_id = %request.task_id, disks = request.disk_count()))]
    pub async fn snapshot_all(
        &self,
        request: &SnapshotRequest,
        freezer: &dyn Freezer,
    ) -> (SnapshotResult, Vec<BlobSnapshotInfo>, RunOutcome) {
        let guard = ThawGuard::new(freezer, self.config.freeze_enabled);
        let decision = self.selector.decide(request.disk_count());
        self.telemetry
            .record(keys::SNAPSHOT_STRATEGY, decision.strategy);
        info!(strategy = %decision.strategy, reason = ?decision.reason, "snapshot run starting");

        let started = Instant::now();
        let mut aggregator = ResultAggregator::new(&request.disks);
        let mut slow_start = false;

        match decision.strategy {
            Strategy::Sequential => self.run_sequential(request, &mut aggregator).await,
            Strategy::Parallel => {
                let attempt = self.run_parallel(request, &mut aggregator).await;
                slow_start = attempt.slow_start;
                if let Err(e) = attempt.result {
                    if !guard.is_thawed() && aggregator.all_failed() {
                        warn!(error = %e, "parallel run failed before any disk succeeded, retrying sequentially");
                        aggregator = ResultAggregator::new(&request.disks);
                        self.run_sequential(request, &mut aggregator).await;
                    } else {
                        warn!(error = %e, pending = aggregator.pending_count(), "parallel run incomplete");
                        aggregator.abandon_pending(&e.to_string());
                    }
                }
            }
        }
        self.telemetry
            .record_duration(keys::SNAPSHOT_TIME_TAKEN, started.elapsed());

        let thaw = self.thaw(&guard).await;
        if slow_start {
            info!(threshold_ms = self.config.slow_start_threshold.as_millis() as u64, "slow worker start, next run will be sequential");
            if let Err(e) = self.selector.mark_next_sequential() {
                warn!(error = %e, "failed to persist sequential strategy flag");
            }
        }

        let (result, infos, outcome) = aggregator.finish(thaw);
        info!(
            errors = result.errors.len(),
            all_failed = outcome.all_failed,
            inconsistent = outcome.is_inconsistent,
            "snapshot run finished"
        );
        (result, infos, outcome)
    }

    /// Awaits each disk in turn. A panicking worker costs only its own
    /// slot, which is abandoned once the loop is done.
    async fn run_sequential(&self, request: &SnapshotRequest, aggregator: &mut ResultAggregator) {
        let mut panicked = None;
        for (index, disk) in request.disks.iter().enumerate() {
            let call = self.worker.snapshot_disk(index, disk, &request.metadata);
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(report) => {
                    let _ = aggregator.apply(report);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(index, disk = disk.display_url(), error = %message, "worker panicked");
                    let _ = panicked.get_or_insert(EngineError::WorkerPanicked(message));
                }
            }
        }
        if let Some(e) = panicked {
            aggregator.abandon_pending(&e.to_string());
        }
    }

    async fn run_parallel(&self, request: &SnapshotRequest, aggregator: &mut ResultAggregator) -> ParallelAttempt {
        let started = Instant::now();
        let metadata: Arc<[MetadataTag]> = request.metadata.clone().into();
        let tasks: Vec<WorkerTask> = request
            .disks
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, disk)| {
                let worker = Arc::clone(&self.worker);
                let metadata = Arc::clone(&metadata);
                async move {
                    let report = worker.snapshot_disk(index, &disk, &metadata).await;
                    IndexedReport { index, report }
                }
                .boxed()
            })
            .collect();

        let mut set = match self.pool.start(tasks) {
            Ok(set) => set,
            Err(e) => {
                return ParallelAttempt {
                    slow_start: false,
                    result: Err(e.into()),
                }
            }
        };
        let start_elapsed = started.elapsed();
        let slow_start = start_elapsed >= self.config.slow_start_threshold;

        let drain = async {
            let mut failure = None;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(indexed) => {
                        let _ = aggregator.apply(indexed.report);
                    }
                    Err(e) => {
                        warn!(error = %e, "worker task did not report");
                        let _ = failure.get_or_insert(EngineError::WorkerPanicked(e.to_string()));
                    }
                }
            }
            failure
        };

        let drained = match self.config.join_timeout {
            None => Some(drain.await),
            Some(limit) => tokio::time::timeout(limit, drain).await.ok(),
        };
        let failure = match drained {
            Some(failure) => failure,
            None => {
                set.shutdown().await;
                Some(EngineError::JoinTimeout(self.config.join_timeout.unwrap_or_default()))
            }
        };

        ParallelAttempt {
            slow_start,
            result: failure.map_or(Ok(()), Err),
        }
    }

    async fn thaw(&self, guard: &ThawGuard<'_>) -> Option<ThawResult> {
        let started = Instant::now();
        let thaw = guard.thaw_once().await?;
        self.telemetry
            .record_duration(keys::THAW_TIME, started.elapsed());
        if thaw.is_ok() {
            info!("filesystem thawed");
        } else {
            warn!(errors = ?thaw.errors, "thaw failed, run is inconsistent");
        }
        Some(thaw)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
