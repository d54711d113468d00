use crate::errors::StoreError;

/// Key of the persisted strategy override flag.
pub const SEQ_SNAPSHOT_KEY: &str = "seqsnapshot";

/// Local key/value store holding the adaptive strategy flag across runs.
pub trait StrategyStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Interpretation of the persisted `seqsnapshot` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyOverride {
    /// Unset or `"0"`: decide per run.
    Auto,
    /// `"1"` (set adaptively) or `"2"` (set by an operator).
    ForceSequential,
}

impl StrategyOverride {
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(str::trim) {
            Some("1") | Some("2") => Self::ForceSequential,
            _ => Self::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing() {
        assert_eq!(StrategyOverride::from_flag(None), StrategyOverride::Auto);
        assert_eq!(StrategyOverride::from_flag(Some("0")), StrategyOverride::Auto);
        assert_eq!(StrategyOverride::from_flag(Some("1")), StrategyOverride::ForceSequential);
        assert_eq!(StrategyOverride::from_flag(Some("2")), StrategyOverride::ForceSequential);
        assert_eq!(StrategyOverride::from_flag(Some(" 1\n")), StrategyOverride::ForceSequential);
        assert_eq!(StrategyOverride::from_flag(Some("yes")), StrategyOverride::Auto);
    }
}
