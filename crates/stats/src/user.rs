use crate::DAY_MS;
use crate::models::UserPlayStat;
use indexmap::IndexMap;
use reel_records::{PlayRecord, UserMeta};
use std::cmp::Reverse;
use std::collections::HashSet;

const RECENT_RECORDS: usize = 10;

/// Statistics of one user from their play records and login metadata.
///
/// Ties in [`most_watched_source`](UserPlayStat::most_watched_source) and in
/// the recent records keep the order in which `records` yields them.
pub fn compute_user_stat<'a>(
    username: &str,
    records: impl IntoIterator<Item = &'a PlayRecord>,
    login_meta: Option<&UserMeta>,
    now: i64,
) -> UserPlayStat {
    let records: Vec<&PlayRecord> = records.into_iter().collect();
    let meta = login_meta.cloned().unwrap_or_default();

    let total_plays = records.len() as u64;
    let total_watch_time: u64 = records.iter().map(|r| r.play_time).sum();
    let last_play_time = records.iter().map(|r| r.save_time).max().unwrap_or(0);
    let first_watch_date = records.iter().map(|r| r.save_time).min().unwrap_or(now);
    let total_movies = records
        .iter()
        .map(|r| (r.title.as_str(), r.source_name.as_str(), r.year.as_str()))
        .collect::<HashSet<_>>()
        .len() as u64;
    let avg_watch_time = if total_plays == 0 {
        0.0
    } else {
        total_watch_time as f64 / total_plays as f64
    };

    let mut recent = records.clone();
    // Stable: equal save times keep input order.
    recent.sort_by_key(|r| Reverse(r.save_time));
    let recent_records = recent.into_iter().take(RECENT_RECORDS).cloned().collect();

    let since = meta.created_at.unwrap_or(first_watch_date);
    let registration_days = (now.saturating_sub(since).max(0) / DAY_MS) as u64 + 1;

    UserPlayStat {
        username: username.to_string(),
        total_watch_time,
        total_plays,
        last_play_time,
        recent_records,
        avg_watch_time,
        most_watched_source: most_frequent(records.iter().map(|r| r.source_name.as_str())).unwrap_or_default(),
        total_movies,
        first_watch_date,
        registration_days,
        login_count: meta.login_count,
        first_login_time: meta.first_login_time,
        last_login_time: meta.last_login_time,
        created_at: meta.created_at,
    }
}

/// Most frequent non-empty value; ties go to the one seen first.
fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: IndexMap<&str, u64> = IndexMap::new();
    for value in values.filter(|v| !v.is_empty()) {
        *counts.entry(value).or_default() += 1;
    }
    let mut best: Option<(&str, u64)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}
