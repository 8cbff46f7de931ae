//! Wall-clock helpers. Everything at rest is stored as epoch milliseconds.

use std::time::Duration;
use time::UtcDateTime;

/// Current time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    // i128 nanos only overflow i64 millis some 292 million years from now.
    (UtcDateTime::now().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Absolute expiry timestamp for a value written at `now` with `ttl`.
pub fn expiry(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}
