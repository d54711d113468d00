use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use vmsnap_core::{StoreError, StrategyOverride, StrategyStore, SEQ_SNAPSHOT_KEY};

use crate::error::EngineError;

/// How the per-disk calls of one run are executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    Sequential,
    Parallel,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecisionReason {
    /// The persisted flag forces sequential.
    Override,
    /// Too few disks to be worth a task group.
    SmallRequest,
    LargeRequest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StrategyDecision {
    pub strategy: Strategy,
    pub reason: DecisionReason,
}

/// Picks the strategy for a run and maintains the persisted override.
#[derive(Clone)]
pub struct StrategySelector {
    store: Arc<dyn StrategyStore>,
    sequential_threshold: usize,
}

impl StrategySelector {
    pub fn new(store: Arc<dyn StrategyStore>, sequential_threshold: usize) -> Self {
        Self {
            store,
            sequential_threshold,
        }
    }

    /// Sequential when the flag is `"1"`/`"2"` or the request has at most
    /// `sequential_threshold` disks. An unreadable store counts as unset.
    pub fn decide(&self, disk_count: usize) -> StrategyDecision {
        let flag = self.store.get(SEQ_SNAPSHOT_KEY).unwrap_or_else(|e| {
            warn!(error = %e, "failed to read strategy flag, deciding automatically");
            None
        });

        let (strategy, reason) = if StrategyOverride::from_flag(flag.as_deref()) == StrategyOverride::ForceSequential {
            (Strategy::Sequential, DecisionReason::Override)
        } else if disk_count <= self.sequential_threshold {
            (Strategy::Sequential, DecisionReason::SmallRequest)
        } else {
            (Strategy::Parallel, DecisionReason::LargeRequest)
        };
        debug!(disk_count, flag = flag.as_deref().unwrap_or(""), %strategy, ?reason, "strategy decided");
        StrategyDecision { strategy, reason }
    }

    /// Force the next run to be sequential.
    pub fn mark_next_sequential(&self) -> Result<(), EngineError> {
        self.store.set(SEQ_SNAPSHOT_KEY, "1")?;
        Ok(())
    }

    /// Return to automatic selection.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.store.set(SEQ_SNAPSHOT_KEY, "0")?;
        Ok(())
    }

    pub fn current_flag(&self) -> Result<Option<String>, EngineError> {
        Ok(self.store.get(SEQ_SNAPSHOT_KEY)?)
    }
}

/// In-memory store, for tests and for runs without persistence.
#[derive(Debug, Default)]
pub struct MemoryStrategyStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStrategyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        let _ = self.values.lock().insert(key.to_string(), value.to_string());
        self
    }
}

impl StrategyStore for MemoryStrategyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _ = self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON object file of string values. Created on first write; written
/// atomically through a temp file and rename; never deleted.
#[derive(Debug)]
pub struct FileStrategyStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStrategyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StrategyStore for FileStrategyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut values = self.read_all()?;
        let _ = values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), key, value, "strategy flag written");
        Ok(())
    }
}
