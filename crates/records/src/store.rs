use crate::error::{ErrorKind, Result};
use crate::key::RecordKey;
use crate::models::{Favorite, PlayRecord, SkipConfig, UserMeta};
use exn::ResultExt;
use futures::future::try_join_all;
use reel_cache::{TieredCache, ttl};
use reel_storage::{BackendHandle, StorageBackend, StorageBackendExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::instrument;

/// Cache category for single-record reads.
const CACHE_CATEGORY: &str = "records";
/// Most recent searches kept per user.
pub const SEARCH_HISTORY_LIMIT: usize = 20;

const USER_ROOT: &str = "u";
const REGISTRY_ROOT: &str = "users";

#[derive(Debug, Clone, Copy)]
enum Kind {
    Play,
    Favorite,
    Skip,
}
impl Kind {
    fn segment(self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Favorite => "fav",
            Self::Skip => "skip",
        }
    }
}

fn check_username(username: &str) -> Result<&str> {
    if username.is_empty() || username.contains(['/', '\\', '\0']) || matches!(username, "." | "..") {
        exn::bail!(ErrorKind::InvalidUsername(username.to_string()));
    }
    Ok(username)
}

fn user_prefix(username: &str) -> Result<String> {
    Ok(format!("{USER_ROOT}/{}/", check_username(username)?))
}

fn kind_prefix(username: &str, kind: Kind) -> Result<String> {
    Ok(format!("{}{}/", user_prefix(username)?, kind.segment()))
}

fn record_path(username: &str, kind: Kind, key: &RecordKey) -> Result<String> {
    Ok(format!("{}{key}", kind_prefix(username, kind)?))
}

fn search_path(username: &str) -> Result<String> {
    Ok(format!("{}search", user_prefix(username)?))
}

fn registry_path(username: &str) -> Result<String> {
    Ok(format!("{REGISTRY_ROOT}/{}", check_username(username)?))
}

/// Access to every per-user record over one storage backend.
///
/// Single-record reads can go through a [`TieredCache`]; any write or delete
/// of a record invalidates its cache entry in both tiers. Listings always go
/// to the backend.
#[derive(Clone)]
pub struct RecordStore {
    backend: BackendHandle,
    cache: Option<Arc<TieredCache>>,
}

impl RecordStore {
    pub fn new(backend: BackendHandle) -> Self {
        Self { backend, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    async fn read<T>(&self, path: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Serialize + Send + Sync,
    {
        if let Some(cache) = &self.cache {
            match cache.get_as::<T>(CACHE_CATEGORY, path).await {
                Ok(Some(hit)) => return Ok(Some(hit)),
                Ok(None) => {},
                Err(e) => tracing::warn!(key = path, error = %e, "Record cache unavailable, reading through"),
            }
        }
        let value = self.backend.get_as::<T>(path).await.or_raise(|| ErrorKind::Storage)?;
        if let (Some(cache), Some(value)) = (&self.cache, &value)
            && let Err(e) = cache.set_as(CACHE_CATEGORY, path, value, Some(ttl::MEDIUM)).await
        {
            tracing::warn!(key = path, error = %e, "Could not cache record");
        }
        Ok(value)
    }

    async fn write<T>(&self, path: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.backend.set_as(path, value, None).await.or_raise(|| ErrorKind::Storage)?;
        self.invalidate(path).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.backend.delete(path).await.or_raise(|| ErrorKind::Storage)?;
        self.invalidate(path).await
    }

    async fn invalidate(&self, path: &str) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.delete(CACHE_CATEGORY, path).await.or_raise(|| ErrorKind::Storage)?;
        }
        Ok(())
    }

    /// Every record of one kind, keyed by record key. Entries whose key or
    /// body can't be decoded are skipped.
    async fn list<T>(&self, username: &str, kind: Kind) -> Result<BTreeMap<RecordKey, T>>
    where
        T: DeserializeOwned + Send,
    {
        let prefix = kind_prefix(username, kind)?;
        let paths = self.backend.keys(&prefix).await.or_raise(|| ErrorKind::Storage)?;
        let reads = paths.iter().filter_map(|path| {
            let raw = path.strip_prefix(&prefix)?;
            match raw.parse::<RecordKey>() {
                Ok(key) => Some(async move {
                    let value = self.backend.get_as::<T>(path).await.or_raise(|| ErrorKind::Storage)?;
                    Ok::<_, crate::error::Error>(value.map(|value| (key, value)))
                }),
                Err(_) => {
                    tracing::warn!(key = path.as_str(), "Skipping stored record with malformed key");
                    None
                },
            }
        });
        Ok(try_join_all(reads).await?.into_iter().flatten().collect())
    }

    /// Delete every record of one kind. Returns how many were removed.
    async fn clear(&self, username: &str, kind: Kind) -> Result<usize> {
        let prefix = kind_prefix(username, kind)?;
        self.remove_prefix(&prefix).await
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let paths = self.backend.keys(prefix).await.or_raise(|| ErrorKind::Storage)?;
        try_join_all(paths.iter().map(|path| self.remove(path))).await?;
        Ok(paths.len())
    }

    pub async fn play_record(&self, username: &str, key: &RecordKey) -> Result<Option<PlayRecord>> {
        self.read(&record_path(username, Kind::Play, key)?).await
    }

    pub async fn save_play_record(&self, username: &str, key: &RecordKey, record: &PlayRecord) -> Result<()> {
        self.write(&record_path(username, Kind::Play, key)?, record).await
    }

    pub async fn delete_play_record(&self, username: &str, key: &RecordKey) -> Result<()> {
        self.remove(&record_path(username, Kind::Play, key)?).await
    }

    pub async fn play_records(&self, username: &str) -> Result<BTreeMap<RecordKey, PlayRecord>> {
        self.list(username, Kind::Play).await
    }

    pub async fn clear_play_records(&self, username: &str) -> Result<usize> {
        self.clear(username, Kind::Play).await
    }

    /// Play records of every registered user and of anyone else who owns
    /// stored records, keyed by username.
    #[instrument(skip(self))]
    pub async fn play_records_by_user(&self) -> Result<BTreeMap<String, BTreeMap<RecordKey, PlayRecord>>> {
        let mut usernames: BTreeSet<String> = self.usernames().await?.into_iter().collect();
        usernames.extend(self.owners().await?);
        let all = try_join_all(usernames.into_iter().map(|username| async move {
            let records = self.play_records(&username).await?;
            Ok::<_, crate::error::Error>((username, records))
        }))
        .await?;
        Ok(all.into_iter().collect())
    }

    pub async fn favorite(&self, username: &str, key: &RecordKey) -> Result<Option<Favorite>> {
        self.read(&record_path(username, Kind::Favorite, key)?).await
    }

    pub async fn save_favorite(&self, username: &str, key: &RecordKey, favorite: &Favorite) -> Result<()> {
        self.write(&record_path(username, Kind::Favorite, key)?, favorite).await
    }

    pub async fn delete_favorite(&self, username: &str, key: &RecordKey) -> Result<()> {
        self.remove(&record_path(username, Kind::Favorite, key)?).await
    }

    pub async fn favorites(&self, username: &str) -> Result<BTreeMap<RecordKey, Favorite>> {
        self.list(username, Kind::Favorite).await
    }

    pub async fn clear_favorites(&self, username: &str) -> Result<usize> {
        self.clear(username, Kind::Favorite).await
    }

    pub async fn skip_config(&self, username: &str, key: &RecordKey) -> Result<Option<SkipConfig>> {
        self.read(&record_path(username, Kind::Skip, key)?).await
    }

    pub async fn save_skip_config(&self, username: &str, key: &RecordKey, config: &SkipConfig) -> Result<()> {
        self.write(&record_path(username, Kind::Skip, key)?, config).await
    }

    pub async fn delete_skip_config(&self, username: &str, key: &RecordKey) -> Result<()> {
        self.remove(&record_path(username, Kind::Skip, key)?).await
    }

    pub async fn skip_configs(&self, username: &str) -> Result<BTreeMap<RecordKey, SkipConfig>> {
        self.list(username, Kind::Skip).await
    }

    /// Search keywords, most recent first.
    pub async fn search_history(&self, username: &str) -> Result<Vec<String>> {
        let path = search_path(username)?;
        Ok(self.backend.get_as(&path).await.or_raise(|| ErrorKind::Storage)?.unwrap_or_default())
    }

    /// Move `keyword` to the front of the history, dropping the oldest
    /// entries beyond [`SEARCH_HISTORY_LIMIT`]. Blank keywords are ignored.
    pub async fn add_search_history(&self, username: &str, keyword: &str) -> Result<()> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(());
        }
        let mut history = self.search_history(username).await?;
        history.retain(|existing| existing != keyword);
        history.insert(0, keyword.to_string());
        history.truncate(SEARCH_HISTORY_LIMIT);
        self.backend.set_as(&search_path(username)?, &history, None).await.or_raise(|| ErrorKind::Storage)
    }

    /// Remove one keyword, or the whole history when `keyword` is `None`.
    pub async fn delete_search_history(&self, username: &str, keyword: Option<&str>) -> Result<()> {
        let path = search_path(username)?;
        let Some(keyword) = keyword else {
            return self.backend.delete(&path).await.or_raise(|| ErrorKind::Storage);
        };
        let mut history = self.search_history(username).await?;
        let before = history.len();
        history.retain(|existing| existing != keyword.trim());
        if history.len() == before {
            return Ok(());
        }
        self.backend.set_as(&path, &history, None).await.or_raise(|| ErrorKind::Storage)
    }

    /// Add a user to the registry. Returns `false` if they already exist.
    pub async fn register_user(&self, username: &str, now: i64) -> Result<bool> {
        if self.user_exists(username).await? {
            return Ok(false);
        }
        let meta = UserMeta {
            created_at: Some(now),
            ..UserMeta::default()
        };
        self.backend.set_as(&registry_path(username)?, &meta, None).await.or_raise(|| ErrorKind::Storage)?;
        Ok(true)
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        self.backend.exists(&registry_path(username)?).await.or_raise(|| ErrorKind::Storage)
    }

    /// Every registered username, sorted.
    pub async fn usernames(&self) -> Result<Vec<String>> {
        let prefix = format!("{REGISTRY_ROOT}/");
        let keys = self.backend.keys(&prefix).await.or_raise(|| ErrorKind::Storage)?;
        let mut usernames: Vec<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect();
        usernames.sort();
        Ok(usernames)
    }

    /// Usernames with anything stored under their namespace, registered or
    /// not.
    async fn owners(&self) -> Result<BTreeSet<String>> {
        let prefix = format!("{USER_ROOT}/");
        let keys = self.backend.keys(&prefix).await.or_raise(|| ErrorKind::Storage)?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix)?.split_once('/'))
            .map(|(username, _)| username.to_string())
            .collect())
    }

    pub async fn user_meta(&self, username: &str) -> Result<Option<UserMeta>> {
        self.backend.get_as(&registry_path(username)?).await.or_raise(|| ErrorKind::Storage)
    }

    /// Count a login, registering the user if needed.
    pub async fn record_login(&self, username: &str, now: i64) -> Result<UserMeta> {
        let mut meta = self.user_meta(username).await?.unwrap_or_default();
        meta.created_at.get_or_insert(now);
        meta.first_login_time.get_or_insert(now);
        meta.last_login_time = Some(now);
        meta.login_count += 1;
        self.backend.set_as(&registry_path(username)?, &meta, None).await.or_raise(|| ErrorKind::Storage)?;
        Ok(meta)
    }

    /// Remove a user and everything they own. Returns how many keys were
    /// removed, the registry entry included.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, username: &str) -> Result<usize> {
        let removed = self.remove_prefix(&user_prefix(username)?).await?;
        let registry = registry_path(username)?;
        let registered = self.backend.exists(&registry).await.or_raise(|| ErrorKind::Storage)?;
        self.backend.delete(&registry).await.or_raise(|| ErrorKind::Storage)?;
        Ok(removed + usize::from(registered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_cache::CacheConfig;
    use reel_storage::StorageBackend;
    use reel_storage::backend::MemoryBackend;
    use rstest::rstest;
    use serde_json::json;

    fn key(raw: &str) -> RecordKey {
        raw.parse().unwrap()
    }

    fn record(title: &str, play_time: u64) -> PlayRecord {
        PlayRecord {
            title: title.to_string(),
            source_name: "Site A".to_string(),
            play_time,
            total_time: 3600,
            save_time: 1_700_000_000_000,
            ..PlayRecord::default()
        }
    }

    fn store() -> (BackendHandle, RecordStore) {
        let backend: BackendHandle = Arc::new(MemoryBackend::default());
        (backend.clone(), RecordStore::new(backend))
    }

    #[tokio::test]
    async fn test_play_record_round_trip() {
        let (backend, store) = store();
        let k = key("siteA+1");
        assert_eq!(store.play_record("alice", &k).await.unwrap(), None);
        store.save_play_record("alice", &k, &record("Dune", 60)).await.unwrap();
        assert_eq!(store.play_record("alice", &k).await.unwrap(), Some(record("Dune", 60)));
        assert!(backend.exists("u/alice/play/siteA+1").await.unwrap());
        // Other users don't see it.
        assert_eq!(store.play_record("bob", &k).await.unwrap(), None);
        store.delete_play_record("alice", &k).await.unwrap();
        store.delete_play_record("alice", &k).await.unwrap();
        assert_eq!(store.play_record("alice", &k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_listing_and_clearing() {
        let (_, store) = store();
        store.save_play_record("alice", &key("siteA+1"), &record("A", 1)).await.unwrap();
        store.save_play_record("alice", &key("siteB+2"), &record("B", 2)).await.unwrap();
        store.save_favorite("alice", &key("siteA+1"), &Favorite::default()).await.unwrap();
        store.save_play_record("alicia", &key("siteA+1"), &record("C", 3)).await.unwrap();

        let records = store.play_records("alice").await.unwrap();
        assert_eq!(records.keys().map(ToString::to_string).collect::<Vec<_>>(), vec!["siteA+1", "siteB+2"]);
        assert_eq!(records[&key("siteB+2")].play_time, 2);

        assert_eq!(store.clear_play_records("alice").await.unwrap(), 2);
        assert!(store.play_records("alice").await.unwrap().is_empty());
        assert_eq!(store.favorites("alice").await.unwrap().len(), 1);
        assert_eq!(store.play_records("alicia").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped_in_listings() {
        let backend: BackendHandle = Arc::new(MemoryBackend::with_entries([
            ("u/alice/play/siteA+1", json!({"title": "ok"})),
            ("u/alice/play/not-a-record-key", json!({"title": "bad key"})),
            ("u/alice/play/siteA+2", json!("not an object")),
        ]));
        let store = RecordStore::new(backend);
        let records = store.play_records("alice").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[&key("siteA+1")].title, "ok");
    }

    #[tokio::test]
    async fn test_skip_configs() {
        let (_, store) = store();
        let config = SkipConfig {
            enable: true,
            intro_time: 90,
            outro_time: 120,
        };
        store.save_skip_config("alice", &key("siteA+1"), &config).await.unwrap();
        assert_eq!(store.skip_config("alice", &key("siteA+1")).await.unwrap(), Some(config.clone()));
        assert_eq!(store.skip_configs("alice").await.unwrap().len(), 1);
        store.delete_skip_config("alice", &key("siteA+1")).await.unwrap();
        assert!(store.skip_configs("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_history() {
        let (_, store) = store();
        for keyword in ["dune", "matrix", "  ", "dune", " alien "] {
            store.add_search_history("alice", keyword).await.unwrap();
        }
        assert_eq!(store.search_history("alice").await.unwrap(), vec!["alien", "dune", "matrix"]);

        store.delete_search_history("alice", Some("dune")).await.unwrap();
        assert_eq!(store.search_history("alice").await.unwrap(), vec!["alien", "matrix"]);
        store.delete_search_history("alice", None).await.unwrap();
        assert!(store.search_history("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_history_is_capped() {
        let (_, store) = store();
        for n in 0..25 {
            store.add_search_history("alice", &format!("q{n}")).await.unwrap();
        }
        let history = store.search_history("alice").await.unwrap();
        assert_eq!(history.len(), SEARCH_HISTORY_LIMIT);
        assert_eq!(history.first().map(String::as_str), Some("q24"));
        assert_eq!(history.last().map(String::as_str), Some("q5"));
    }

    #[tokio::test]
    async fn test_users() {
        let (_, store) = store();
        assert!(store.register_user("bob", 10).await.unwrap());
        assert!(!store.register_user("bob", 20).await.unwrap());
        let meta = store.record_login("alice", 100).await.unwrap();
        assert_eq!(meta.login_count, 1);
        let meta = store.record_login("alice", 200).await.unwrap();
        assert_eq!(
            meta,
            UserMeta {
                created_at: Some(100),
                login_count: 2,
                first_login_time: Some(100),
                last_login_time: Some(200),
            }
        );
        assert_eq!(store.usernames().await.unwrap(), vec!["alice", "bob"]);
        assert_eq!(store.user_meta("bob").await.unwrap().unwrap().created_at, Some(10));
    }

    #[tokio::test]
    async fn test_delete_user_removes_everything() {
        let (backend, store) = store();
        store.register_user("alice", 1).await.unwrap();
        store.save_play_record("alice", &key("siteA+1"), &record("A", 1)).await.unwrap();
        store.save_favorite("alice", &key("siteA+1"), &Favorite::default()).await.unwrap();
        store.add_search_history("alice", "dune").await.unwrap();
        store.register_user("bob", 1).await.unwrap();

        assert_eq!(store.delete_user("alice").await.unwrap(), 4);
        assert!(backend.keys("u/alice/").await.unwrap().is_empty());
        assert!(!store.user_exists("alice").await.unwrap());
        assert_eq!(store.usernames().await.unwrap(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_play_records_by_user() {
        let (_, store) = store();
        store.register_user("alice", 1).await.unwrap();
        store.register_user("bob", 1).await.unwrap();
        store.save_play_record("alice", &key("siteA+1"), &record("A", 1)).await.unwrap();
        let all = store.play_records_by_user().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["alice"].len(), 1);
        assert!(all["bob"].is_empty());

        // Unregistered owners are included too.
        store.save_play_record("carol", &key("siteA+2"), &record("B", 1)).await.unwrap();
        store.add_search_history("dave", "dune").await.unwrap();
        let all = store.play_records_by_user().await.unwrap();
        assert_eq!(all.keys().map(String::as_str).collect::<Vec<_>>(), vec!["alice", "bob", "carol", "dave"]);
        assert!(all["dave"].is_empty());
    }

    #[tokio::test]
    async fn test_cached_reads_are_invalidated_on_write() {
        let (backend, store) = store();
        let cache = Arc::new(TieredCache::new(CacheConfig::default(), None));
        let store = store.with_cache(cache.clone());
        let k = key("siteA+1");
        store.save_play_record("alice", &k, &record("A", 10)).await.unwrap();
        assert_eq!(store.play_record("alice", &k).await.unwrap().unwrap().play_time, 10);
        assert_eq!(cache.stats().await.volatile_entries, 1);

        // A write through the store replaces the cached copy.
        store.save_play_record("alice", &k, &record("A", 20)).await.unwrap();
        assert_eq!(store.play_record("alice", &k).await.unwrap().unwrap().play_time, 20);

        // A write behind the store's back is masked until invalidation.
        backend.delete("u/alice/play/siteA+1").await.unwrap();
        assert!(store.play_record("alice", &k).await.unwrap().is_some());
        store.delete_play_record("alice", &k).await.unwrap();
        assert_eq!(store.play_record("alice", &k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cached_reads_never_cross_users() {
        let (backend, store) = store();
        let config = CacheConfig {
            max_size: 0,
            ..CacheConfig::default()
        };
        let cache = Arc::new(TieredCache::new(config, Some(backend.clone())));
        let store = store.with_cache(cache.clone());
        let k = key("siteA+1");
        store.save_play_record("a.b", &k, &record("Private", 10)).await.unwrap();
        assert!(store.play_record("a.b", &k).await.unwrap().is_some());
        cache.flush().await;

        // "a.b" and "a_b" share a sanitized cache key.
        assert_eq!(store.play_record("a_b", &k).await.unwrap(), None);
        assert!(store.play_records("a_b").await.unwrap().is_empty());
    }

    #[rstest]
    #[case("")]
    #[case("a/b")]
    #[case("..")]
    #[tokio::test]
    async fn test_invalid_usernames(#[case] username: &str) {
        let (_, store) = store();
        let err = store.play_records(username).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUsername(_)));
    }
}
