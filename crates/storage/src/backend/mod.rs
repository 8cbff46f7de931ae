//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! key-value interface across different backends (local file tree, in-memory,
//! Redis, S3-compatible services, SQLite).
//!

#[cfg(test)]
mod contract;
mod envelope;
mod local;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod ro;
#[cfg(feature = "s3")]
mod s3;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use self::local::LocalBackend;
pub use self::memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;
pub use self::ro::ReadOnlyBackend;
#[cfg(feature = "s3")]
pub use self::s3::{S3Backend, S3Options};
#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteBackend;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use futures::{Stream, TryStreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

/// Keys yielded by [`StorageBackend::key_stream()`].
pub type KeyStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

/// Unified interface for storage backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access. It's a glorified key-value CRUD
/// interface, and every implementation must behave identically as far as a
/// caller can observe.
///
/// # Keys
/// Keys are validated with [`validate_key`](crate::validate_key) by every
/// implementation, so a key is either valid everywhere or nowhere.
///
/// # Absence
/// Missing keys are never errors: [`get()`](Self::get) returns `None` and
/// [`delete()`](Self::delete) is idempotent. Stored data that can't be decoded
/// is logged and also reported as `None`.
///
/// # Concurrency
/// There is no locking across operations. Two concurrent `set` calls on the
/// same key race, and whichever completes last wins.
///
/// # Examples
///
/// ```
/// use reel_storage::backend::{MemoryBackend, StorageBackend};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MemoryBackend::default();
/// backend.set("u/alice/play/siteA+1", &json!({"play_time": 60}), None).await?;
/// assert!(backend.exists("u/alice/play/siteA+1").await?);
/// assert_eq!(backend.keys("u/alice/").await?, vec!["u/alice/play/siteA+1".to_string()]);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend. Used for logging only, so it doesn't
    /// matter to this crate whether names are unique.
    fn name(&self) -> &str;

    /// Fetch the value stored under `key`.
    ///
    /// Returns `None` if the key doesn't exist, has expired, or holds data
    /// that can't be decoded.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing anything already there.
    ///
    /// With a `ttl`, the value stops being visible no later than `ttl` after
    /// the write. Backends with native expiry use it; the rest record the
    /// deadline next to the value and check it on read.
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()>;

    /// Delete `key`. Deleting a key that doesn't exist is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether a (live) value exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Stream every key starting with `prefix` (plain string prefix).
    ///
    /// Order is unspecified. Keys written with a TTL may still be listed
    /// after they expire on backends that only expire lazily; a subsequent
    /// [`get()`](Self::get) reports them as absent.
    fn key_stream<'a>(&'a self, prefix: &'a str) -> KeyStream<'a>;

    /// List every key starting with `prefix`.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`key_stream()`](Self::key_stream) into a [`Vec`] before
    /// returning.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.key_stream(prefix).try_collect().await
    }
}

/// Typed helpers on top of [`StorageBackend`].
#[async_trait]
pub trait StorageBackendExt: StorageBackend {
    /// Fetch and decode the value under `key`.
    ///
    /// A stored value that doesn't fit `T` is treated as absent (and logged),
    /// the same as corrupt data.
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        let Some(value) = self.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                tracing::warn!(backend = self.name(), key, error = %e, "Ignoring malformed stored value");
                Ok(None)
            },
        }
    }

    /// Encode `value` and store it under `key`.
    async fn set_as<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let encoded = serde_json::to_value(value).or_raise(|| ErrorKind::Serialization(key.to_string()))?;
        self.set(key, &encoded, ttl).await
    }
}
impl<B: StorageBackend + ?Sized> StorageBackendExt for B {}
