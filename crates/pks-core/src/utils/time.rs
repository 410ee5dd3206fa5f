//! Time Utilities
//!
//! Timestamps are stored as epoch milliseconds and exposed as `DateTime<Utc>`.

use chrono::{DateTime, Utc};

/// Current UTC time at storage precision (milliseconds)
pub fn now_utc() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

/// Convert a timestamp to epoch milliseconds for storage
pub fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert stored epoch milliseconds back to a timestamp.
///
/// Out-of-range values clamp to the Unix epoch.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Whole days elapsed from `earlier` to `later` (never negative)
pub fn days_between(earlier: &DateTime<Utc>, later: &DateTime<Utc>) -> i64 {
    (*later - *earlier).num_days().max(0)
}
