//! Time utilities for Floe.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current timestamp in seconds since UNIX_EPOCH.
///
/// Used for executor registration times and state-change bookkeeping.
pub fn current_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Current timestamp in milliseconds since UNIX_EPOCH.
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
