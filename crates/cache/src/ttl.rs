//! TTL presets shared by callers of the cache.

use std::time::Duration;

/// Five minutes. Search results and other volatile listings.
pub const SHORT: Duration = Duration::from_secs(300);
/// Thirty minutes.
pub const MEDIUM: Duration = Duration::from_secs(1800);
/// One hour. Detail pages.
pub const LONG: Duration = Duration::from_secs(3600);
/// Two hours.
pub const VERY_LONG: Duration = Duration::from_secs(7200);
