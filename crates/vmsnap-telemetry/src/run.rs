use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Keys recorded during a snapshot run.
pub mod keys {
    pub const SNAPSHOT_CREATOR: &str = "snapshotCreator";
    pub const SNAPSHOT_STRATEGY: &str = "snapshotStrategy";
    pub const FREEZE_TIME: &str = "FreezeTime";
    pub const THAW_TIME: &str = "ThawTime";
    pub const SNAPSHOT_TIME_TAKEN: &str = "snapshotTimeTaken";
    pub const HOST_STATUS_PRE_SNAPSHOT: &str = "hostStatusCodePreSnapshot";
    pub const HOST_STATUS_DO_SNAPSHOT: &str = "hostStatusCodeDoSnapshot";

    pub const CREATOR_GUEST: &str = "guestExtension";
    pub const CREATOR_HOST: &str = "backupHostService";
}

/// Ordered key/value bag describing one run, reported next to its status.
/// Cheap to clone; clones share the same entries. Re-recording a key
/// replaces its value in place.
#[derive(Clone, Debug, Default)]
pub struct RunTelemetry {
    entries: Arc<Mutex<Vec<(String, String)>>>,
}

impl RunTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str, value: impl ToString) {
        let value = value.to_string();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            entries.push((key.to_string(), value));
        }
    }

    /// Record a duration as milliseconds.
    pub fn record_duration(&self, key: &str, elapsed: Duration) {
        self.record(key, elapsed.as_millis());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }
}

impl Serialize for RunTelemetry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries = self.snapshot();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (k, v) in &entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
