use serde::{Deserialize, Serialize};

/// Where snapshots are taken from, and in which order the two paths are tried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotMode {
    OnlyGuest,
    #[default]
    FirstGuestThenHost,
    FirstHostThenGuest,
    OnlyHost,
}

impl SnapshotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnlyGuest => "onlyGuest",
            Self::FirstGuestThenHost => "firstGuestThenHost",
            Self::FirstHostThenGuest => "firstHostThenGuest",
            Self::OnlyHost => "onlyHost",
        }
    }
}

impl std::fmt::Display for SnapshotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SnapshotMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onlyGuest" => Ok(Self::OnlyGuest),
            "firstGuestThenHost" => Ok(Self::FirstGuestThenHost),
            "firstHostThenGuest" => Ok(Self::FirstHostThenGuest),
            "onlyHost" => Ok(Self::OnlyHost),
            other => Err(format!("unknown snapshot mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        for mode in [
            SnapshotMode::OnlyGuest,
            SnapshotMode::FirstGuestThenHost,
            SnapshotMode::FirstHostThenGuest,
            SnapshotMode::OnlyHost,
        ] {
            assert_eq!(mode.to_string().parse::<SnapshotMode>().unwrap(), mode);
        }
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&SnapshotMode::FirstHostThenGuest).unwrap();
        assert_eq!(json, r#""firstHostThenGuest""#);
    }

    #[test]
    fn unknown_mode_rejected() {
        assert!("guestOnly".parse::<SnapshotMode>().is_err());
    }
}
