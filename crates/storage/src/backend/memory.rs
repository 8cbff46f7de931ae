//! In-memory storage backend.

use super::KeyStream;
use crate::StorageBackend;
use crate::clock;
use crate::error::Result;
use crate::key::{validate as validate_key, validate_prefix};
use async_stream::stream;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone)]
struct Entry {
    value: Value,
    expire_at: Option<i64>,
}
impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expire_at.is_none_or(|at| at > now)
    }
}

/// In-memory storage backend.
///
/// Values are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Nothing survives
/// the process, which makes it the backend of choice for unit tests in the
/// crates built on top of this one, and for throwaway deployments.
///
/// # Examples
///
/// ```
/// use reel_storage::backend::{MemoryBackend, StorageBackend};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MemoryBackend::with_entries([
///     ("admin/sources", json!([])),
/// ]);
/// assert!(backend.exists("admin/sources").await?);
///
/// backend.set("users/alice", &json!({"login_count": 1}), None).await?;
/// assert!(backend.exists("users/alice").await?);
/// # Ok(())
/// # }
/// ```
pub struct MemoryBackend {
    name: String,
    storage: RwLock<HashMap<String, Entry>>,
}

impl MemoryBackend {
    /// Create a memory backend pre-populated with values.
    ///
    /// Panics if any key fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_entries(entries: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        let mut map = HashMap::new();
        for (key, value) in entries {
            let key = key.into();
            if validate_key(&key).is_err() {
                // The panic here is DELIBERATE. There is no error result.
                panic!("MemoryBackend::with_entries: invalid key {key:?}");
            }
            map.insert(key, Entry { value, expire_at: None });
        }
        Self {
            name: "memory".to_string(),
            storage: RwLock::new(map),
        }
    }

    /// Change the name of the memory backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of stored entries, including expired ones not yet read back.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
impl Default for MemoryBackend {
    fn default() -> Self {
        let entries: [(&str, Value); 0] = [];
        Self::with_entries(entries)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = validate_key(key)?;
        let now = clock::now_millis();
        let entry = self.storage.read().await.get(key).cloned();
        match entry {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value)),
            Some(_) => {
                // Re-check under the write lock: a concurrent set may have
                // replaced the expired value in the meantime.
                let mut guard = self.storage.write().await;
                if guard.get(key).is_some_and(|e| !e.is_live(now)) {
                    guard.remove(key);
                }
                Ok(None)
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        let key = validate_key(key)?;
        let expire_at = ttl.map(|ttl| clock::expiry(clock::now_millis(), ttl));
        self.storage.write().await.insert(key.to_string(), Entry { value: value.clone(), expire_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = validate_key(key)?;
        self.storage.write().await.remove(key);
        Ok(())
    }

    fn key_stream<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        if let Err(e) = validate_prefix(prefix) {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }

        Box::pin(stream! {
            // Snapshot matching keys under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let now = clock::now_millis();
            let keys: Vec<String> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
                    .map(|(key, _)| key.clone())
                    .collect()
            };
            for key in keys {
                yield Ok(key);
            }
        })
    }
}
