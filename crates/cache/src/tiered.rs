use crate::entry::CacheEntry;
use crate::error::{ErrorKind, Result};
use crate::key::{cache_key, persistent_category_prefix, persistent_key, persistent_prefix};
use exn::ResultExt;
use futures::future::join_all;
use lru::LruCache;
use reel_storage::{BackendHandle, StorageBackend, clock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::instrument;

/// Sizing and scheduling of a [`TieredCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Upper bound on entries held by the volatile tier.
    pub max_size: usize,
    /// Period of the background sweep started by
    /// [`start_cleanup()`](TieredCache::start_cleanup).
    pub cleanup_interval: Duration,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Counters reported by [`TieredCache::stats()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub volatile_entries: usize,
    pub max_size: usize,
    pub persistent: bool,
}

/// What a sweep removed, per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub volatile: usize,
    pub persistent: usize,
}

/// Two-tier cache.
///
/// Reads check the volatile tier first and fall back to the persistent tier,
/// promoting what they find. Writes land in the volatile tier immediately and
/// are persisted on a background task; a failed persistent write is logged
/// and never fails the caller.
///
/// Entries are addressed by `(category, key)`. Categories group entries so
/// they can be cleared together.
///
/// # Examples
///
/// ```
/// use reel_cache::{CacheConfig, TieredCache, ttl};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = TieredCache::new(CacheConfig::default(), None);
/// cache.set("search", "dune", json!(["siteA+1"]), Some(ttl::SHORT)).await;
/// assert_eq!(cache.get("search", "dune").await?, Some(json!(["siteA+1"])));
/// # Ok(())
/// # }
/// ```
pub struct TieredCache {
    config: CacheConfig,
    volatile: Mutex<LruCache<String, CacheEntry>>,
    persistent: Option<BackendHandle>,
    writes: TaskTracker,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TieredCache {
    pub fn new(config: CacheConfig, persistent: Option<BackendHandle>) -> Self {
        Self {
            config,
            // Bounded manually so that evictions can be counted and so that
            // max_size == 0 is allowed (volatile tier disabled).
            volatile: Mutex::new(LruCache::unbounded()),
            persistent,
            writes: TaskTracker::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fetch a live value.
    pub async fn get(&self, category: &str, key: &str) -> Result<Option<Value>> {
        let volatile_key = cache_key(category, key);
        let now = clock::now_millis();
        {
            let mut volatile = self.volatile.lock().await;
            let expired = match volatile.get_mut(&volatile_key) {
                // `{category}:{key}` is ambiguous once either contains a colon.
                Some(entry) if !entry.belongs_to(category, key) => false,
                Some(entry) if !entry.is_expired(now) => {
                    entry.last_access_time = now;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.data.clone()));
                },
                Some(_) => true,
                None => false,
            };
            if expired {
                volatile.pop(&volatile_key);
            }
        }

        let Some(entry) = self.persistent_get(category, key, now).await? else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        self.hits.fetch_add(1, Ordering::Relaxed);
        let data = entry.data.clone();
        self.insert_volatile(volatile_key, CacheEntry {
            last_access_time: now,
            ..entry
        })
        .await;
        Ok(Some(data))
    }

    /// Look the entry up in the persistent tier, removing it there if it has
    /// expired, can't be decoded or has no owner. A document written for
    /// another `(category, key)` with the same sanitized storage key is a miss
    /// and left alone.
    async fn persistent_get(&self, category: &str, key: &str, now: i64) -> Result<Option<CacheEntry>> {
        let Some(backend) = &self.persistent else {
            return Ok(None);
        };
        let storage_key = persistent_key(category, key);
        let Some(document) = backend.get(&storage_key).await.or_raise(|| ErrorKind::Storage)? else {
            return Ok(None);
        };
        match serde_json::from_value::<CacheEntry>(document) {
            Ok(entry) if entry.belongs_to(category, key) => {
                if !entry.is_expired(now) {
                    return Ok(Some(entry));
                }
            },
            Ok(entry) if entry.category.is_some() || entry.key.is_some() => return Ok(None),
            Ok(_) => tracing::warn!(backend = backend.name(), key = storage_key, "Dropping cache entry without an owner"),
            Err(e) => {
                tracing::warn!(backend = backend.name(), key = storage_key, error = %e, "Dropping malformed cache entry")
            },
        }
        backend.delete(&storage_key).await.or_raise(|| ErrorKind::Storage)?;
        Ok(None)
    }

    async fn insert_volatile(&self, volatile_key: String, entry: CacheEntry) {
        let mut volatile = self.volatile.lock().await;
        volatile.put(volatile_key, entry);
        let evicted = Self::evict_over(&mut volatile, self.config.max_size);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    fn evict_over(volatile: &mut LruCache<String, CacheEntry>, max_size: usize) -> usize {
        let mut evicted = 0;
        while volatile.len() > max_size && volatile.pop_lru().is_some() {
            evicted += 1;
        }
        evicted
    }

    /// Store a value, expiring `ttl` from now if given.
    pub async fn set(&self, category: &str, key: &str, value: Value, ttl: Option<Duration>) {
        let entry = CacheEntry::new(value, ttl, clock::now_millis()).owned_by(category, key);
        if let Some(backend) = &self.persistent {
            let backend = backend.clone();
            let storage_key = persistent_key(category, key);
            let document = serde_json::to_value(&entry);
            self.writes.spawn(async move {
                // Expiry is recorded inside the entry itself, so the backend
                // gets no TTL of its own.
                let result = match document {
                    Ok(document) => backend.set(&storage_key, &document, None).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                if let Err(error) = result {
                    tracing::warn!(backend = backend.name(), key = storage_key, error, "Persistent cache write failed");
                }
            });
        }
        self.insert_volatile(cache_key(category, key), entry).await;
    }

    /// Wait until every persistent write started so far has completed.
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }

    /// Remove an entry from both tiers.
    pub async fn delete(&self, category: &str, key: &str) -> Result<()> {
        {
            let volatile_key = cache_key(category, key);
            let mut volatile = self.volatile.lock().await;
            if volatile.peek(&volatile_key).is_some_and(|entry| entry.belongs_to(category, key)) {
                volatile.pop(&volatile_key);
            }
        }
        if let Some(backend) = &self.persistent {
            // A pending write must not resurrect the entry after the delete.
            self.flush().await;
            backend.delete(&persistent_key(category, key)).await.or_raise(|| ErrorKind::Storage)?;
        }
        Ok(())
    }

    /// Remove every entry of `category` from both tiers. Returns how many
    /// entries were removed in total.
    ///
    /// Categories are matched exactly: clearing `a` leaves `a:b` and `a.b`
    /// alone even though their keys share a prefix.
    #[instrument(skip(self))]
    pub async fn clear_category(&self, category: &str) -> Result<usize> {
        let mut removed = {
            let mut volatile = self.volatile.lock().await;
            let doomed: Vec<String> = volatile
                .iter()
                .filter(|(_, entry)| entry.category.as_deref() == Some(category))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &doomed {
                volatile.pop(key);
            }
            doomed.len()
        };
        if let Some(backend) = &self.persistent {
            self.flush().await;
            for storage_key in backend.keys(&persistent_category_prefix(category)).await.or_raise(|| ErrorKind::Storage)? {
                let Some(document) = backend.get(&storage_key).await.or_raise(|| ErrorKind::Storage)? else {
                    continue;
                };
                // Another category whose name sanitizes the same way.
                let foreign = serde_json::from_value::<CacheEntry>(document)
                    .is_ok_and(|entry| entry.category.is_some_and(|owner| owner != category));
                if !foreign {
                    backend.delete(&storage_key).await.or_raise(|| ErrorKind::Storage)?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Sweep both tiers for expired entries.
    ///
    /// A persistent entry that can't be read or deleted is logged and skipped;
    /// only failing to list the persistent tier fails the sweep.
    ///
    /// The volatile tier is locked per entry and the sweep yields between
    /// entries, so readers are never blocked for the length of a sweep.
    #[instrument(skip(self))]
    pub async fn clear_expired(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let candidates: Vec<String> = self.volatile.lock().await.iter().map(|(k, _)| k.clone()).collect();
        for key in candidates {
            let now = clock::now_millis();
            {
                let mut volatile = self.volatile.lock().await;
                if volatile.peek(&key).is_some_and(|entry| entry.is_expired(now)) {
                    volatile.pop(&key);
                    report.volatile += 1;
                }
            }
            tokio::task::yield_now().await;
        }

        if let Some(backend) = &self.persistent {
            for storage_key in backend.keys(&persistent_prefix()).await.or_raise(|| ErrorKind::Storage)? {
                let document = match backend.get(&storage_key).await {
                    Ok(Some(document)) => document,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(key = storage_key, error = %e, "Skipping unreadable cache entry");
                        continue;
                    },
                };
                let expired = match serde_json::from_value::<CacheEntry>(document) {
                    Ok(entry) => entry.is_expired(clock::now_millis()),
                    Err(e) => {
                        tracing::warn!(key = storage_key, error = %e, "Dropping malformed cache entry");
                        true
                    },
                };
                if expired {
                    match backend.delete(&storage_key).await {
                        Ok(()) => report.persistent += 1,
                        Err(e) => tracing::warn!(key = storage_key, error = %e, "Could not delete expired cache entry"),
                    }
                }
                tokio::task::yield_now().await;
            }
        }
        Ok(report)
    }

    /// Evict least recently used entries until the volatile tier is back
    /// within `max_size`. Returns how many were evicted.
    pub async fn trim(&self) -> usize {
        let evicted = Self::evict_over(&mut *self.volatile.lock().await, self.config.max_size);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Fetch several keys of one category concurrently.
    ///
    /// Misses are left out of the result. A key whose lookup fails is logged
    /// and treated as a miss.
    pub async fn mget<K: AsRef<str>>(&self, category: &str, keys: &[K]) -> HashMap<String, Value> {
        let lookups = keys.iter().map(|key| async move {
            let key = key.as_ref();
            match self.get(category, key).await {
                Ok(value) => value.map(|value| (key.to_string(), value)),
                Err(e) => {
                    tracing::warn!(category, key, error = %e, "Cache lookup failed");
                    None
                },
            }
        });
        join_all(lookups).await.into_iter().flatten().collect()
    }

    /// Store several values of one category concurrently, sharing one TTL.
    pub async fn mset(&self, category: &str, entries: impl IntoIterator<Item = (String, Value)>, ttl: Option<Duration>) {
        let writes = entries.into_iter().map(|(key, value)| async move { self.set(category, &key, value, ttl).await });
        join_all(writes).await;
    }

    /// Load every key that isn't cached yet through `loader`, concurrently.
    ///
    /// A loader returning `Ok(None)` caches nothing. A failing loader (or
    /// lookup) is logged and doesn't stop the other keys. Returns how many
    /// entries were loaded.
    pub async fn warm<K, F, Fut, E>(&self, category: &str, keys: &[K], ttl: Option<Duration>, loader: F) -> usize
    where
        K: AsRef<str>,
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<Option<Value>, E>>,
        E: Display,
    {
        let loader = &loader;
        let loads = keys.iter().map(|key| async move {
            let key = key.as_ref();
            match self.get(category, key).await {
                Ok(Some(_)) => return false,
                Ok(None) => {},
                Err(e) => tracing::warn!(category, key, error = %e, "Cache lookup failed while warming"),
            }
            match loader(key.to_string()).await {
                Ok(Some(value)) => {
                    self.set(category, key, value, ttl).await;
                    true
                },
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(category, key, error = %e, "Cache warm-up loader failed");
                    false
                },
            }
        });
        join_all(loads).await.into_iter().filter(|loaded| *loaded).count()
    }

    /// Fetch and decode a value. A value that doesn't fit `T` is a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, category: &str, key: &str) -> Result<Option<T>> {
        let Some(value) = self.get(category, key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                tracing::warn!(category, key, error = %e, "Ignoring cached value of unexpected shape");
                Ok(None)
            },
        }
    }

    /// Encode and store a value.
    pub async fn set_as<T: Serialize + ?Sized>(&self, category: &str, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let value = serde_json::to_value(value).or_raise(|| ErrorKind::Serialization(cache_key(category, key)))?;
        self.set(category, key, value, ttl).await;
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            volatile_entries: self.volatile.lock().await.len(),
            max_size: self.config.max_size,
            persistent: self.persistent.is_some(),
        }
    }
}
