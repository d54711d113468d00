use chrono::NaiveDateTime;

use crate::error::HostError;

const FRACTIONAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
const WHOLE_SECONDS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Convert a broker creation time (`2024-03-01T12:00:00.123Z` or
/// `2024-03-01T12:00:00Z`, always UTC) to milliseconds since the epoch.
/// Any other shape is rejected.
pub fn creation_time_to_ticks(value: &str) -> Result<i64, HostError> {
    let parsed = NaiveDateTime::parse_from_str(value, FRACTIONAL_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, WHOLE_SECONDS_FORMAT))
        .map_err(|_| HostError::InvalidCreationTime(value.to_string()))?;
    Ok(parsed.and_utc().timestamp_millis())
}
