use std::sync::atomic::{AtomicBool, Ordering};

use vmsnap_core::{Freezer, ThawResult};

/// Releases a held freeze at most once, however many exit paths ask for it.
pub struct ThawGuard<'a> {
    freezer: &'a dyn Freezer,
    freeze_held: bool,
    thawed: AtomicBool,
}

impl<'a> ThawGuard<'a> {
    /// `freeze_held == false` means there is nothing to release; the guard
    /// still records the boundary as passed.
    pub fn new(freezer: &'a dyn Freezer, freeze_held: bool) -> Self {
        Self {
            freezer,
            freeze_held,
            thawed: AtomicBool::new(false),
        }
    }

    /// Thaw if no one has yet. Returns `None` when the thaw already
    /// happened or no freeze is held.
    pub async fn thaw_once(&self) -> Option<ThawResult> {
        if self.thawed.swap(true, Ordering::SeqCst) || !self.freeze_held {
            return None;
        }
        Some(self.freezer.thaw().await)
    }

    pub fn is_thawed(&self) -> bool {
        self.thawed.load(Ordering::SeqCst)
    }
}
