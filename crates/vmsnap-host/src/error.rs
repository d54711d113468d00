/// Internal classification of a failed host broker call. Callers only ever
/// see the mapped status code.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host request failed: {0}")]
    Connection(String),

    #[error("host broker is not running (status {status})")]
    BrokerNotRunning { status: u16 },

    #[error("host returned {status} with an empty body")]
    EmptyBody { status: u16 },

    #[error("invalid host JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized creation time: {0}")]
    InvalidCreationTime(String),

    #[error("invalid host address: {0}")]
    InvalidAddress(String),
}

impl HostError {
    /// Status code recorded for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Connection(_) => crate::client::CONNECTION_FAILURE_STATUS,
            Self::BrokerNotRunning { .. } => crate::client::BROKER_NOT_RUNNING_STATUS,
            Self::EmptyBody { .. } => crate::client::EMPTY_BODY_STATUS,
            Self::Json(_) | Self::InvalidCreationTime(_) | Self::InvalidAddress(_) => {
                crate::client::LOCAL_EXCEPTION_STATUS
            }
        }
    }
}
