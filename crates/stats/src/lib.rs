//! Statistics over play records.
//!
//! Everything here is a pure function of its inputs: no I/O, no clock. The
//! current time is always passed in, so the same inputs always give the same
//! output.

mod content;
mod models;
mod site;
mod user;

pub use crate::content::compute_content_stat;
pub use crate::models::{
    ActiveUsers, ContentStat, DailyRegistrations, DailyStat, RegistrationStats, SiteStat, SourceCount, UserPlayStat,
};
pub use crate::site::compute_site_stat;
pub use crate::user::compute_user_stat;

/// One day in epoch millis.
pub(crate) const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// UTC calendar day of an epoch-millis timestamp.
pub(crate) fn day_of(millis: i64) -> Option<time::Date> {
    time::UtcDateTime::from_unix_timestamp(millis.div_euclid(1000)).ok().map(|t| t.date())
}
