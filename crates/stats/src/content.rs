use crate::models::ContentStat;
use reel_records::{PlayRecord, RecordKey};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

struct Fold<'a> {
    key: &'a RecordKey,
    latest: &'a PlayRecord,
    play_count: u64,
    total_watch_time: u64,
    users: HashSet<&'a str>,
    last_played: i64,
}

/// The `limit` most played titles across every user.
///
/// Sorted by play count, then by most recently played, then by key, so the
/// order is total and doesn't depend on map iteration order.
pub fn compute_content_stat(
    per_user_records: &BTreeMap<String, BTreeMap<RecordKey, PlayRecord>>,
    limit: usize,
) -> Vec<ContentStat> {
    let mut folds: HashMap<&RecordKey, Fold<'_>> = HashMap::new();
    for (username, records) in per_user_records {
        for (key, record) in records {
            let fold = folds.entry(key).or_insert_with(|| Fold {
                key,
                latest: record,
                play_count: 0,
                total_watch_time: 0,
                users: HashSet::new(),
                last_played: record.save_time,
            });
            fold.play_count += 1;
            fold.total_watch_time += record.play_time;
            fold.users.insert(username.as_str());
            if record.save_time > fold.last_played {
                fold.last_played = record.save_time;
                fold.latest = record;
            }
        }
    }

    let mut folds: Vec<Fold<'_>> = folds.into_values().collect();
    folds.sort_by(|a, b| {
        (Reverse(a.play_count), Reverse(a.last_played), a.key).cmp(&(Reverse(b.play_count), Reverse(b.last_played), b.key))
    });
    folds.truncate(limit);
    folds.into_iter().map(Fold::into_stat).collect()
}

impl Fold<'_> {
    fn into_stat(self) -> ContentStat {
        ContentStat {
            key: self.key.to_string(),
            source: self.key.source().to_string(),
            id: self.key.id().to_string(),
            title: self.latest.title.clone(),
            source_name: self.latest.source_name.clone(),
            cover: self.latest.cover.clone(),
            year: self.latest.year.clone(),
            play_count: self.play_count,
            total_watch_time: self.total_watch_time,
            average_watch_time: self.total_watch_time as f64 / self.play_count as f64,
            unique_users: self.users.len() as u64,
            last_played: self.last_played,
        }
    }
}
