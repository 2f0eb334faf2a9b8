//! Timestamp utilities
//!
//! Remote session snapshots are ordered by wall-clock epoch milliseconds
//! (last-write-wins). Clock skew between devices is an accepted risk; the
//! comparison trusts each device's clock as-is.

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current wall-clock time as epoch milliseconds.
///
/// This is the sole cross-device ordering key for session snapshots.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
