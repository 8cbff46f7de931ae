use crate::models::{
    ActiveUsers, DailyRegistrations, DailyStat, RegistrationStats, SiteStat, SourceCount, UserPlayStat,
};
use crate::{DAY_MS, day_of};
use indexmap::IndexMap;

const TRAILING_DAYS: i64 = 7;
const TOP_SOURCES: usize = 5;

/// Site-wide statistics from every user's [`UserPlayStat`].
///
/// `all_usernames` is the user registry; it decides the number of registered
/// users even for users without statistics. With no statistics at all the
/// result is zeroed, though the seven-day series are still present.
pub fn compute_site_stat(all_usernames: &[String], per_user_stats: &[UserPlayStat], now: i64) -> SiteStat {
    let days = trailing_days(now);
    let total_registered_users = all_usernames.len() as u64;

    if per_user_stats.is_empty() {
        return SiteStat {
            total_users: total_registered_users,
            total_watch_time: 0,
            total_plays: 0,
            avg_watch_time_per_user: 0.0,
            avg_plays_per_user: 0.0,
            top_sources: Vec::new(),
            daily_stats: days.iter().map(|date| daily(date, 0, 0)).collect(),
            registration_stats: RegistrationStats {
                today_new_users: 0,
                total_registered_users,
                registration_trend: days.iter().map(|date| registrations(date, 0)).collect(),
            },
            active_users: ActiveUsers::default(),
        };
    }

    let total_users = total_registered_users.max(per_user_stats.len() as u64);
    let total_watch_time: u64 = per_user_stats.iter().map(|s| s.total_watch_time).sum();
    let total_plays: u64 = per_user_stats.iter().map(|s| s.total_plays).sum();

    // No per-day history is kept, so spread the totals evenly.
    let per_day = TRAILING_DAYS as u64;
    let daily_stats = days.iter().map(|date| daily(date, total_watch_time / per_day, total_plays / per_day)).collect();

    let registration_trend: Vec<DailyRegistrations> = days
        .iter()
        .map(|date| {
            let count = per_user_stats.iter().filter(|s| registered_on(s).and_then(day_of).as_ref() == Some(date)).count();
            registrations(date, count as u64)
        })
        .collect();
    let today_new_users = registration_trend.last().map_or(0, |r| r.new_users);

    let active_within = |days: i64| {
        let since = now.saturating_sub(days * DAY_MS);
        per_user_stats.iter().filter(|s| s.last_play_time >= since).count() as u64
    };

    SiteStat {
        total_users,
        total_watch_time,
        total_plays,
        avg_watch_time_per_user: total_watch_time as f64 / total_users as f64,
        avg_plays_per_user: total_plays as f64 / total_users as f64,
        top_sources: top_sources(per_user_stats),
        daily_stats,
        registration_stats: RegistrationStats {
            today_new_users,
            total_registered_users,
            registration_trend,
        },
        active_users: ActiveUsers {
            daily: active_within(1),
            weekly: active_within(7),
            monthly: active_within(30),
        },
    }
}

/// When a user joined: their first play, or for users who never played
/// anything, their registration time if it is known.
fn registered_on(stat: &UserPlayStat) -> Option<i64> {
    match stat.total_plays {
        0 => stat.created_at,
        _ => Some(stat.first_watch_date),
    }
}

/// The seven UTC days ending today, oldest first.
fn trailing_days(now: i64) -> Vec<time::Date> {
    (0..TRAILING_DAYS).rev().filter_map(|back| day_of(now - back * DAY_MS)).collect()
}

fn daily(date: &time::Date, watch_time: u64, plays: u64) -> DailyStat {
    DailyStat {
        date: date.to_string(),
        watch_time,
        plays,
    }
}

fn registrations(date: &time::Date, new_users: u64) -> DailyRegistrations {
    DailyRegistrations {
        date: date.to_string(),
        new_users,
    }
}

/// Sources counted across every user's recent records. Equal counts keep the
/// order in which the sources were first seen.
fn top_sources(per_user_stats: &[UserPlayStat]) -> Vec<SourceCount> {
    let mut counts: IndexMap<&str, u64> = IndexMap::new();
    let sources = per_user_stats.iter().flat_map(|s| &s.recent_records).map(|r| r.source_name.as_str());
    for source in sources.filter(|s| !s.is_empty()) {
        *counts.entry(source).or_default() += 1;
    }
    let mut ranked: Vec<SourceCount> = counts
        .into_iter()
        .map(|(source, count)| SourceCount {
            source: source.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(TOP_SOURCES);
    ranked
}
