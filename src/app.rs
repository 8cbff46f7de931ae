//! Wiring from [`Settings`] to a ready-to-use set of stores.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use reel_cache::{CacheConfig, TieredCache};
use reel_config::{CacheSettings, ConfigManager, Settings, StorageSettings};
use reel_records::RecordStore;
use reel_stats::{ContentStat, SiteStat, UserPlayStat};
use reel_storage::BackendHandle;
use reel_storage::backend::{LocalBackend, MemoryBackend, ReadOnlyBackend};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const BACKEND_NAME: &str = "reel";

/// Open the storage backend described by `settings`.
///
/// A relative local or SQLite path is resolved against the current directory.
pub async fn connect(settings: &StorageSettings) -> Result<BackendHandle> {
    let backend: BackendHandle = match settings {
        StorageSettings::Local { path } => {
            let root = absolute(path)?;
            Arc::new(LocalBackend::new(BACKEND_NAME, &root).or_raise(|| ErrorKind::Backend("local".to_string()))?)
        },
        StorageSettings::Memory => Arc::new(MemoryBackend::default().with_name(BACKEND_NAME)),
        #[cfg(feature = "redis")]
        StorageSettings::Redis { url, namespace } => Arc::new(
            reel_storage::backend::RedisBackend::connect(BACKEND_NAME, url, namespace.as_deref())
                .await
                .or_raise(|| ErrorKind::Backend("redis".to_string()))?,
        ),
        #[cfg(feature = "s3")]
        StorageSettings::S3 {
            bucket,
            prefix,
            region,
            endpoint,
            key_id,
            key_secret,
        } => {
            let options = reel_storage::backend::S3Options {
                bucket: bucket.clone(),
                prefix: prefix.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                key_id: key_id.clone(),
                key_secret: key_secret.clone(),
            };
            Arc::new(
                reel_storage::backend::S3Backend::new(BACKEND_NAME, options)
                    .or_raise(|| ErrorKind::Backend("s3".to_string()))?,
            )
        },
        #[cfg(feature = "sqlite")]
        StorageSettings::Sqlite { path } => Arc::new(connect_sqlite(path).await?),
        #[allow(unreachable_patterns)]
        other => exn::bail!(ErrorKind::Backend(format!("{} support is not compiled in", backend_label(other)))),
    };
    tracing::debug!(backend = backend_label(settings), "Opened storage backend");
    Ok(backend)
}

#[cfg(feature = "sqlite")]
async fn connect_sqlite(path: &Path) -> Result<reel_storage::backend::SqliteBackend> {
    reel_storage::backend::SqliteBackend::connect(BACKEND_NAME, absolute(path)?)
        .await
        .or_raise(|| ErrorKind::Backend("sqlite".to_string()))
}

fn backend_label(settings: &StorageSettings) -> &'static str {
    match settings {
        StorageSettings::Local { .. } => "local",
        StorageSettings::Memory => "memory",
        StorageSettings::Redis { .. } => "redis",
        StorageSettings::S3 { .. } => "s3",
        StorageSettings::Sqlite { .. } => "sqlite",
    }
}

fn absolute(path: &Path) -> Result<std::path::PathBuf> {
    std::path::absolute(path).or_raise(|| ErrorKind::Backend(format!("can't resolve {}", path.display())))
}

/// Everything a command needs, built over one backend.
pub struct App {
    backend: BackendHandle,
    cache: Arc<TieredCache>,
    records: RecordStore,
    config: ConfigManager,
    read_only: bool,
    /// Kept to purge expired rows and release the pool on close.
    #[cfg(feature = "sqlite")]
    sqlite: Option<reel_storage::backend::SqliteBackend>,
}

impl App {
    /// Connect to the configured backend. With `read_only`, every write is
    /// logged and dropped instead.
    pub async fn open(settings: &Settings, read_only: bool) -> Result<Self> {
        #[cfg(feature = "sqlite")]
        if let StorageSettings::Sqlite { path } = &settings.storage {
            let sqlite = connect_sqlite(path).await?;
            let mut app = Self::from_backend(Arc::new(sqlite.clone()), &settings.cache, read_only);
            app.sqlite = Some(sqlite);
            return Ok(app);
        }
        let backend = connect(&settings.storage).await?;
        Ok(Self::from_backend(backend, &settings.cache, read_only))
    }

    pub fn from_backend(backend: BackendHandle, cache: &CacheSettings, read_only: bool) -> Self {
        let backend: BackendHandle = match read_only {
            true => Arc::new(ReadOnlyBackend::new(backend)),
            false => backend,
        };
        let config = CacheConfig {
            max_size: cache.max_size,
            cleanup_interval: Duration::from_secs(cache.cleanup_interval_secs),
        };
        let cache = Arc::new(TieredCache::new(config, cache.persistent.then(|| backend.clone())));
        Self {
            records: RecordStore::new(backend.clone()).with_cache(cache.clone()),
            config: ConfigManager::new(backend.clone()),
            backend,
            cache,
            read_only,
            #[cfg(feature = "sqlite")]
            sqlite: None,
        }
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn config(&self) -> &ConfigManager {
        &self.config
    }

    /// Wait for pending persistent cache writes, then shut the backend down.
    ///
    /// A SQLite backend has its expired rows purged (unless read-only) and its
    /// connection pool closed; the app can't be used afterwards.
    pub async fn close(&self) {
        self.cache.flush().await;
        #[cfg(feature = "sqlite")]
        if let Some(sqlite) = &self.sqlite {
            if !self.read_only {
                match sqlite.purge_expired().await {
                    Ok(purged) => tracing::debug!(purged, "Purged expired rows"),
                    Err(e) => tracing::warn!(error = %e, "Could not purge expired rows"),
                }
            }
            sqlite.close().await;
        }
    }

    #[instrument(skip(self))]
    pub async fn user_stat(&self, username: &str, now: i64) -> Result<UserPlayStat> {
        let records = self.records.play_records(username).await.or_raise(|| ErrorKind::Records)?;
        let meta = self.records.user_meta(username).await.or_raise(|| ErrorKind::Records)?;
        Ok(reel_stats::compute_user_stat(username, records.values(), meta.as_ref(), now))
    }

    /// Site statistics over registered users and anyone else with records.
    #[instrument(skip(self))]
    pub async fn site_stat(&self, now: i64) -> Result<SiteStat> {
        let registered = self.records.usernames().await.or_raise(|| ErrorKind::Records)?;
        let by_user = self.records.play_records_by_user().await.or_raise(|| ErrorKind::Records)?;
        let mut per_user = Vec::with_capacity(by_user.len());
        for (username, records) in &by_user {
            let meta = self.records.user_meta(username).await.or_raise(|| ErrorKind::Records)?;
            per_user.push(reel_stats::compute_user_stat(username, records.values(), meta.as_ref(), now));
        }
        Ok(reel_stats::compute_site_stat(&registered, &per_user, now))
    }

    #[instrument(skip(self))]
    pub async fn content_stat(&self, limit: usize) -> Result<Vec<ContentStat>> {
        let by_user = self.records.play_records_by_user().await.or_raise(|| ErrorKind::Records)?;
        Ok(reel_stats::compute_content_stat(&by_user, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_records::{PlayRecord, RecordKey};
    use reel_storage::StorageBackend;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn app(read_only: bool) -> (BackendHandle, App) {
        let backend: BackendHandle = Arc::new(MemoryBackend::default());
        (backend.clone(), App::from_backend(backend, &CacheSettings::default(), read_only))
    }

    fn record(title: &str, play_time: u64, save_time: i64) -> PlayRecord {
        PlayRecord {
            title: title.to_string(),
            source_name: "Site A".to_string(),
            play_time,
            save_time,
            ..PlayRecord::default()
        }
    }

    #[tokio::test]
    async fn test_connect_local_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let backend = connect(&StorageSettings::Local { path: root.clone() }).await.unwrap();
        backend.set("admin/config", &json!({}), None).await.unwrap();
        assert!(root.join("admin").is_dir());
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_connect_without_feature() {
        let settings = StorageSettings::Redis {
            url: "redis://127.0.0.1".to_string(),
            namespace: None,
        };
        let err = connect(&settings).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::Backend(_)));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_close_shuts_sqlite_down() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            storage: StorageSettings::Sqlite {
                path: dir.path().join("reel.db"),
            },
            ..Settings::default()
        };
        let app = App::open(&settings, false).await.unwrap();
        app.backend().set("cache/a", &json!(1), Some(Duration::from_millis(1))).await.unwrap();
        app.backend().set("admin/config", &json!({}), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        app.close().await;
        assert!(app.backend().get("admin/config").await.is_err());

        let reopened = reel_storage::backend::SqliteBackend::connect("check", dir.path().join("reel.db")).await.unwrap();
        assert_eq!(reopened.purge_expired().await.unwrap(), 0);
        assert_eq!(reopened.get("admin/config").await.unwrap(), Some(json!({})));
    }

    #[tokio::test]
    async fn test_read_only_drops_writes() {
        let (backend, app) = app(true);
        assert!(app.records().register_user("alice", NOW).await.unwrap());
        assert!(backend.keys("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let (_, app) = app(false);
        let store = app.records();
        store.register_user("alice", NOW - 1000).await.unwrap();
        store.register_user("idle", NOW - 1000).await.unwrap();
        for (id, play_time) in [("1", 100), ("2", 200), ("3", 300)] {
            let key = RecordKey::from_parts("siteA", id).unwrap();
            store.save_play_record("alice", &key, &record(id, play_time, NOW - 10)).await.unwrap();
        }
        // Records without a registry entry still count.
        let key = RecordKey::from_parts("siteA", "1").unwrap();
        store.save_play_record("ghost", &key, &record("1", 50, NOW - 5)).await.unwrap();

        let alice = app.user_stat("alice", NOW).await.unwrap();
        assert_eq!(alice.total_plays, 3);
        assert_eq!(alice.total_watch_time, 600);
        assert_eq!(alice.avg_watch_time, 200.0);
        assert_eq!(alice.total_movies, 3);

        let site = app.site_stat(NOW).await.unwrap();
        assert_eq!(site.total_users, 3);
        assert_eq!(site.total_plays, 4);
        assert_eq!(site.registration_stats.total_registered_users, 2);

        let content = app.content_stat(1).await.unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].key, "siteA+1");
        assert_eq!(content[0].unique_users, 2);
    }
}
