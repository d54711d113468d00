use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The file parsed, but the merged result does not fit `VmSnapSettings`
    /// (unknown snapshot mode, wrong field type).
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_errors_name_the_path() {
        let err = SettingsError::Read {
            path: PathBuf::from("/etc/vmsnap.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "cannot read settings file /etc/vmsnap.json: denied");

        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("s.json"),
            source,
        };
        assert!(err.to_string().starts_with("settings file s.json is not valid JSON"));
    }

    #[test]
    fn shape_errors_convert_from_serde() {
        let source = serde_json::from_value::<u64>(serde_json::json!("ten")).unwrap_err();
        let err: SettingsError = source.into();
        assert!(matches!(err, SettingsError::Shape(_)));
    }
}
