//! Redis-compatible storage backend.
//!
//! Works with anything that speaks the Redis protocol (Redis, Valkey,
//! Kvrocks, Upstash over TLS). Expiry is native (`SET .. PX`), listing uses
//! incremental `SCAN` so large keyspaces never block the server.

use super::KeyStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::key::{validate as validate_key, validate_prefix};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use ::redis::aio::ConnectionManager;
use serde_json::Value;
use std::time::Duration;

/// Hint for how many keys each `SCAN` round trip should look at.
const SCAN_COUNT: usize = 500;

/// Redis storage backend.
///
/// Values are stored as JSON strings. All keys can optionally live under a
/// namespace so that several deployments can share one database.
///
/// # Examples
///
/// ```no_run
/// use reel_storage::backend::RedisBackend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = RedisBackend::connect("redis", "redis://127.0.0.1:6379", Some("reel:")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisBackend {
    name: String,
    /// Reconnects transparently; cloning it is cheap.
    conn: ConnectionManager,
    namespace: String,
}

impl RedisBackend {
    /// Connect to the server at `url` (`redis://`, `rediss://`).
    pub async fn connect(name: impl Into<String>, url: &str, namespace: Option<&str>) -> Result<Self> {
        let client = ::redis::Client::open(url).or_raise(|| ErrorKind::BackendError("invalid redis url".to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .or_raise(|| ErrorKind::Network(format!("could not connect to redis at {url}")))?;
        Ok(Self {
            name: name.into(),
            conn,
            namespace: namespace.unwrap_or_default().to_string(),
        })
    }

    fn full_key(&self, key: &str) -> Result<String> {
        let key = validate_key(key)?;
        Ok(format!("{}{key}", self.namespace))
    }

    fn network(&self, op: &str) -> ErrorKind {
        ErrorKind::Network(format!("redis {op} failed on backend {}", self.name))
    }
}

/// Escape glob metacharacters so a prefix is matched literally by `SCAN MATCH`.
fn escape_glob(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl StorageBackend for RedisBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let full = self.full_key(key)?;
        let mut conn = self.conn.clone();
        let raw: Option<String> =
            ::redis::cmd("GET").arg(&full).query_async(&mut conn).await.or_raise(|| self.network("GET"))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(backend = %self.name, key, error = %e, "Ignoring corrupt value in redis");
                Ok(None)
            },
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        let full = self.full_key(key)?;
        let encoded = serde_json::to_string(value).or_raise(|| ErrorKind::Serialization(key.to_string()))?;
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(&full).arg(encoded);
        if let Some(ttl) = ttl {
            // Redis refuses a zero expiry; a 1ms TTL is as good as expired.
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
        let mut conn = self.conn.clone();
        cmd.query_async::<_, ()>(&mut conn).await.or_raise(|| self.network("SET"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full = self.full_key(key)?;
        let mut conn = self.conn.clone();
        ::redis::cmd("DEL").arg(&full).query_async::<_, ()>(&mut conn).await.or_raise(|| self.network("DEL"))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full = self.full_key(key)?;
        let mut conn = self.conn.clone();
        ::redis::cmd("EXISTS").arg(&full).query_async(&mut conn).await.or_raise(|| self.network("EXISTS"))
    }

    fn key_stream<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        if let Err(e) = validate_prefix(prefix) {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }
        let pattern = format!("{}*", escape_glob(&format!("{}{prefix}", self.namespace)));

        Box::pin(stream! {
            let mut conn = self.conn.clone();
            let mut cursor: u64 = 0;
            loop {
                let scanned: ::redis::RedisResult<(u64, Vec<String>)> = ::redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut conn)
                    .await;
                let (next, batch) = match scanned {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(exn::Exn::from(ErrorKind::Network(format!("redis SCAN failed: {e}"))));
                        break;
                    },
                };
                for full in batch {
                    // SCAN may return a key more than once across rounds; the
                    // contract doesn't promise uniqueness beyond "finite".
                    if let Some(key) = full.strip_prefix(self.namespace.as_str())
                        && validate_key(key).is_ok()
                    {
                        yield Ok(key.to_string());
                    }
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
        })
    }
}
