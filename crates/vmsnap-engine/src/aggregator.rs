use tracing::{debug, warn};

use vmsnap_core::{
    BlobSnapshotInfo, DiskTarget, RunOutcome, SnapshotError, SnapshotErrorCode, SnapshotResult,
    ThawResult, WorkerReport,
};

/// Collects worker reports, arriving in any order, into a fixed-size array
/// that follows request order.
#[derive(Debug)]
pub struct ResultAggregator {
    blob_urls: Vec<Option<String>>,
    slots: Vec<BlobSnapshotInfo>,
    filled: Vec<bool>,
    errors: Vec<(usize, SnapshotError)>,
}

impl ResultAggregator {
    /// One "not attempted" slot per disk.
    pub fn new(disks: &[DiskTarget]) -> Self {
        Self {
            blob_urls: disks.iter().map(|d| d.blob_url.clone()).collect(),
            slots: vec![BlobSnapshotInfo::not_attempted(); disks.len()],
            filled: vec![false; disks.len()],
            errors: Vec::new(),
        }
    }

    /// Write a report into its slot. Reports for unknown or already filled
    /// slots are dropped and `false` is returned.
    pub fn apply(&mut self, report: WorkerReport) -> bool {
        let index = report.index;
        if index >= self.slots.len() || self.filled[index] {
            warn!(index, slots = self.slots.len(), "dropping unexpected worker report");
            return false;
        }

        let snapshot_uri = match (&report.snapshot_timestamp, &self.blob_urls[index]) {
            (Some(ts), Some(url)) if report.is_successful => Some(format!("{url}?snapshot={ts}")),
            _ => None,
        };
        debug!(index, successful = report.is_successful, status = report.status_code, "slot filled");

        self.slots[index] = BlobSnapshotInfo {
            is_successful: report.is_successful && snapshot_uri.is_some(),
            snapshot_uri,
            error_message: report.error_message,
            status_code: report.status_code,
            dd_snapshot_identifier: None,
        };
        self.filled[index] = true;
        if let Some(error) = report.error {
            self.errors.push((index, error));
        }
        true
    }

    /// Mark every slot that never got a report. The slot keeps the
    /// "not attempted" status but gains an error message.
    pub fn abandon_pending(&mut self, reason: &str) {
        for index in 0..self.slots.len() {
            if self.filled[index] {
                continue;
            }
            self.slots[index].error_message = Some(reason.to_string());
            self.filled[index] = true;
            self.errors.push((
                index,
                SnapshotError::new(SnapshotErrorCode::Abandoned, self.blob_urls[index].clone(), reason),
            ));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.filled.iter().filter(|f| !**f).count()
    }

    /// True while no slot holds a success.
    pub fn all_failed(&self) -> bool {
        !self.slots.iter().any(|s| s.is_successful)
    }

    pub fn slots(&self) -> &[BlobSnapshotInfo] {
        &self.slots
    }

    /// Produce the run's result. A thaw failure goes first in the error
    /// list, ahead of per-disk errors in request order.
    pub fn finish(mut self, thaw: Option<ThawResult>) -> (SnapshotResult, Vec<BlobSnapshotInfo>, RunOutcome) {
        let mut result = SnapshotResult::default();
        let mut outcome = RunOutcome::default();

        if let Some(thaw) = &thaw {
            outcome.unable_to_sleep = thaw.unable_to_sleep;
            if !thaw.is_ok() {
                outcome.is_inconsistent = true;
                result.push(SnapshotError::thaw_failed(&thaw.errors));
            }
        }

        self.errors.sort_by_key(|(index, _)| *index);
        for (_, error) in self.errors {
            result.push(error);
        }

        outcome.all_failed = !self.slots.iter().any(|s| s.is_successful);
        outcome.all_snapshots_failed = outcome.all_failed;
        (result, self.slots, outcome)
    }
}
