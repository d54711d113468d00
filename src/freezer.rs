use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tracing::{debug, warn};

use vmsnap_core::{FreezeResult, Freezer, ThawResult};

const FSFREEZE: &str = "fsfreeze";

/// Freezes mount points with `fsfreeze(8)`.
///
/// Mounts are frozen deepest path first with `/` last, and thawed in the
/// reverse order. Freezing stops at the first failure; thaw only touches
/// mounts that were actually frozen, so a second thaw is a no-op.
pub struct FsFreezeFreezer {
    mounts: Vec<PathBuf>,
    command: String,
    frozen: Mutex<Vec<PathBuf>>,
}

impl FsFreezeFreezer {
    pub fn new(mounts: Vec<PathBuf>) -> Self {
        Self {
            mounts: freeze_order(mounts),
            command: FSFREEZE.to_string(),
            frozen: Mutex::new(Vec::new()),
        }
    }

    /// Use another binary with the same `--freeze`/`--unfreeze` interface.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn mounts(&self) -> &[PathBuf] {
        &self.mounts
    }

    async fn run(&self, flag: &str, mount: &Path) -> Result<(), String> {
        let output = Command::new(&self.command)
            .arg(flag)
            .arg(mount)
            .output()
            .await
            .map_err(|e| format!("{} {flag} {}: {e}", self.command, mount.display()))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "{} {flag} {} exited with {}: {}",
            self.command,
            mount.display(),
            output.status,
            stderr.trim()
        ))
    }
}

#[async_trait]
impl Freezer for FsFreezeFreezer {
    async fn freeze(&self) -> FreezeResult {
        let mut errors = Vec::new();
        for mount in &self.mounts {
            match self.run("--freeze", mount).await {
                Ok(()) => {
                    debug!(mount = %mount.display(), "frozen");
                    self.frozen.lock().push(mount.clone());
                }
                Err(e) => {
                    warn!(mount = %mount.display(), error = %e, "freeze failed");
                    errors.push(e);
                    break;
                }
            }
        }
        FreezeResult { errors }
    }

    async fn thaw(&self) -> ThawResult {
        let frozen: Vec<PathBuf> = std::mem::take(&mut *self.frozen.lock());
        let mut errors = Vec::new();
        for mount in frozen.iter().rev() {
            match self.run("--unfreeze", mount).await {
                Ok(()) => debug!(mount = %mount.display(), "thawed"),
                Err(e) => {
                    warn!(mount = %mount.display(), error = %e, "thaw failed");
                    errors.push(e);
                }
            }
        }
        ThawResult {
            errors,
            unable_to_sleep: false,
        }
    }
}

/// Deduplicate and order mounts for freezing: reverse lexicographic, so
/// nested mounts come before their parents, with `/` always last.
fn freeze_order(mut mounts: Vec<PathBuf>) -> Vec<PathBuf> {
    mounts.sort();
    mounts.dedup();
    mounts.reverse();
    if let Some(pos) = mounts.iter().position(|m| m == Path::new("/")) {
        let root = mounts.remove(pos);
        mounts.push(root);
    }
    mounts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(items: &[&str]) -> Vec<PathBuf> {
        items.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn nested_mounts_first_root_last() {
        let order = freeze_order(paths(&["/", "/data", "/data/logs", "/boot", "/data"]));
        assert_eq!(order, paths(&["/data/logs", "/data", "/boot", "/"]));
    }

    #[tokio::test]
    async fn successful_freeze_and_thaw() {
        let freezer = FsFreezeFreezer::new(paths(&["/", "/data"])).with_command("true");
        assert!(freezer.freeze().await.is_ok());
        assert_eq!(freezer.frozen.lock().len(), 2);

        let thaw = freezer.thaw().await;
        assert!(thaw.is_ok());
        assert!(freezer.frozen.lock().is_empty());
        assert!(freezer.thaw().await.is_ok());
    }

    #[tokio::test]
    async fn freeze_stops_at_first_failure() {
        let freezer = FsFreezeFreezer::new(paths(&["/", "/data"])).with_command("false");
        let result = freezer.freeze().await;
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("--freeze /data"), "{:?}", result.errors);
        assert!(freezer.frozen.lock().is_empty());
    }

    #[tokio::test]
    async fn thaw_failures_are_collected() {
        let freezer = FsFreezeFreezer::new(paths(&["/", "/data"])).with_command("false");
        freezer.frozen.lock().extend(paths(&["/data", "/"]));
        let thaw = freezer.thaw().await;
        assert_eq!(thaw.errors.len(), 2);
        assert!(thaw.errors[0].contains("--unfreeze /"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let freezer = FsFreezeFreezer::new(paths(&["/data"])).with_command("/nonexistent/fsfreeze");
        let result = freezer.freeze().await;
        assert!(!result.is_ok());
    }

    #[tokio::test]
    async fn no_mounts_is_a_noop() {
        let freezer = FsFreezeFreezer::new(Vec::new());
        assert!(freezer.freeze().await.is_ok());
        assert!(freezer.thaw().await.is_ok());
    }
}
