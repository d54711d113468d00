use async_trait::async_trait;

/// Outcome of a freeze attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FreezeResult {
    pub errors: Vec<String>,
}

impl FreezeResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of a thaw. Non-empty `errors` means the run's consistency
/// guarantee is void.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThawResult {
    pub errors: Vec<String>,
    /// The freeze helper could not be parked while the freeze was held.
    pub unable_to_sleep: bool,
}

impl ThawResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Filesystem freeze capability. `thaw` may run on a different task than
/// `freeze` did.
#[async_trait]
pub trait Freezer: Send + Sync {
    async fn freeze(&self) -> FreezeResult;
    async fn thaw(&self) -> ThawResult;
}

/// Freezer for runs where no freeze is held.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopFreezer;

#[async_trait]
impl Freezer for NoopFreezer {
    async fn freeze(&self) -> FreezeResult {
        FreezeResult::default()
    }

    async fn thaw(&self) -> ThawResult {
        ThawResult::default()
    }
}
