//! Timestamp helpers.
//!
//! Durable backends store instants as milliseconds since the Unix epoch;
//! everything in memory uses `DateTime<Utc>`.

use chrono::{DateTime, TimeZone, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Converts a timestamp to milliseconds since the Unix epoch.
#[must_use]
pub fn to_millis(ts: Timestamp) -> i64 {
    ts.timestamp_millis()
}

/// Converts milliseconds since the Unix epoch back into a timestamp.
///
/// Out-of-range values clamp to the epoch.
#[must_use]
pub fn from_millis(millis: i64) -> Timestamp {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}
