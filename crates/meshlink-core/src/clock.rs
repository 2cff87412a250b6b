//! Wall-clock helpers
//!
//! Persisted records carry a `ts` field in fractional Unix seconds so the log
//! files stay readable by the web front end.

use chrono::Utc;
use std::time::Duration;

/// Retention for persisted radio records
pub const RECORD_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Current time as fractional Unix seconds
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Whether a record stamped `ts` is older than `retention` at `now`
pub fn is_expired(ts: f64, now: f64, retention: Duration) -> bool {
    now - ts > retention.as_secs_f64()
}
