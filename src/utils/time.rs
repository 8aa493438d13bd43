//! Wall-clock helpers.
//!
//! Keep-alive timestamps and context activity are UTC milliseconds since the
//! Unix epoch so that both ends of a link agree on their meaning.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{constants, ProtocolError, Result};

/// Current UTC time in milliseconds.
pub fn current_timestamp_millis() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| ProtocolError::Custom(constants::ERR_SYSTEM_TIME.to_string()))
}

/// Current UTC time in milliseconds, or zero if the clock is before the epoch.
pub fn now_millis() -> u64 {
    current_timestamp_millis().unwrap_or(0)
}

/// Time elapsed since `timestamp_ms`, saturating at zero for future stamps.
pub fn elapsed_since(timestamp_ms: u64) -> Duration {
    Duration::from_millis(now_millis().saturating_sub(timestamp_ms))
}

/// Whether more than `max_age` has passed since `timestamp_ms`.
pub fn is_expired(timestamp_ms: u64, max_age: Duration) -> bool {
    elapsed_since(timestamp_ms) > max_age
}
