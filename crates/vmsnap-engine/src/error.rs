use std::time::Duration;

use vmsnap_core::StoreError;

use crate::pool::PoolError;

/// Orchestration-level failures. Handled inside the dispatcher; never
/// returned from `snapshot_all`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("parallel join timed out after {0:?}")]
    JoinTimeout(Duration),

    #[error("worker task failed: {0}")]
    WorkerPanicked(String),

    #[error("strategy store error: {0}")]
    Store(#[from] StoreError),
}
