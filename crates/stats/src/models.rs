use reel_records::PlayRecord;
use serde::Serialize;

/// Viewing statistics of one user. Times are epoch millis, durations seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPlayStat {
    pub username: String,
    pub total_watch_time: u64,
    pub total_plays: u64,
    pub last_play_time: i64,
    /// Up to ten most recently saved records, newest first.
    pub recent_records: Vec<PlayRecord>,
    pub avg_watch_time: f64,
    /// Empty when the user has no records.
    pub most_watched_source: String,
    /// Distinct `(title, source, year)` triples.
    pub total_movies: u64,
    pub first_watch_date: i64,
    /// Calendar days since registration (or first watch), today included.
    pub registration_days: u64,
    pub login_count: u64,
    pub first_login_time: Option<i64>,
    pub last_login_time: Option<i64>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub source: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    /// `YYYY-MM-DD`, UTC.
    pub date: String,
    pub watch_time: u64,
    pub plays: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRegistrations {
    pub date: String,
    pub new_users: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStats {
    pub today_new_users: u64,
    pub total_registered_users: u64,
    pub registration_trend: Vec<DailyRegistrations>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActiveUsers {
    pub daily: u64,
    pub weekly: u64,
    pub monthly: u64,
}

/// Site-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStat {
    pub total_users: u64,
    pub total_watch_time: u64,
    pub total_plays: u64,
    pub avg_watch_time_per_user: f64,
    pub avg_plays_per_user: f64,
    /// At most five, most used first.
    pub top_sources: Vec<SourceCount>,
    /// The trailing seven days, oldest first. The totals are spread evenly
    /// across the days, so this is an approximation.
    pub daily_stats: Vec<DailyStat>,
    pub registration_stats: RegistrationStats,
    pub active_users: ActiveUsers,
}

/// Aggregate of one title (`source+id`) across every user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStat {
    pub key: String,
    pub source: String,
    pub id: String,
    /// Metadata of the most recently saved record.
    pub title: String,
    pub source_name: String,
    pub cover: String,
    pub year: String,
    pub play_count: u64,
    pub total_watch_time: u64,
    pub average_watch_time: f64,
    pub unique_users: u64,
    pub last_played: i64,
}
