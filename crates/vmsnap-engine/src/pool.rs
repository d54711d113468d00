use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinSet;

use vmsnap_core::WorkerReport;

/// A worker's report tagged with the disk's position in the request.
#[derive(Clone, Debug)]
pub struct IndexedReport {
    pub index: usize,
    pub report: WorkerReport,
}

/// One per-disk unit of work for the parallel strategy.
pub type WorkerTask = BoxFuture<'static, IndexedReport>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no tokio runtime available to start workers")]
    NoRuntime,

    #[error("failed to start workers: {0}")]
    Start(String),
}

/// Starts the parallel task group. Either every task is started or, on
/// error, none is.
pub trait WorkerPool: Send + Sync {
    fn start(&self, tasks: Vec<WorkerTask>) -> Result<JoinSet<IndexedReport>, PoolError>;
}

/// Spawns each task onto the current tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioWorkerPool;

impl WorkerPool for TokioWorkerPool {
    fn start(&self, tasks: Vec<WorkerTask>) -> Result<JoinSet<IndexedReport>, PoolError> {
        let handle = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        let mut set = JoinSet::new();
        for task in tasks {
            let _ = set.spawn_on(task, &handle);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use vmsnap_core::WorkerReport;

    use super::*;

    fn task(index: usize) -> WorkerTask {
        async move {
            IndexedReport {
                index,
                report: WorkerReport::succeeded(index, 201, Some(format!("ts-{index}")), None),
            }
        }
        .boxed()
    }

    #[tokio::test]
    async fn starts_every_task() {
        let mut set = TokioWorkerPool.start((0..3).map(task).collect()).unwrap();
        let mut seen = Vec::new();
        while let Some(joined) = set.join_next().await {
            seen.push(joined.unwrap().index);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn fails_outside_runtime() {
        let err = TokioWorkerPool.start(vec![task(0)]).unwrap_err();
        assert!(matches!(err, PoolError::NoRuntime));
    }
}
