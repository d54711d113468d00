//! Snapshot orchestration: strategy selection, the parallel and sequential
//! per-disk runs, result aggregation, the exactly-once thaw boundary, and
//! the coordinator that picks between the guest and host paths.

pub mod aggregator;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod strategy;
pub mod thaw;

pub use aggregator::ResultAggregator;
pub use coordinator::{CoordinatorReport, RunStatus, SnapshotCoordinator};
pub use dispatcher::{DispatcherConfig, SnapshotDispatcher};
pub use error::EngineError;
pub use pool::{IndexedReport, PoolError, TokioWorkerPool, WorkerPool, WorkerTask};
pub use strategy::{
    DecisionReason, FileStrategyStore, MemoryStrategyStore, Strategy, StrategyDecision,
    StrategySelector,
};
pub use thaw::ThawGuard;
