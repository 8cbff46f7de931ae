//! SQLite storage backend.
//!
//! A single `kv` table holds every key. Expiry is stored in its own column so
//! expired rows can be filtered out of listings and purged in bulk.

use super::KeyStream;
use crate::StorageBackend;
use crate::clock;
use crate::error::{ErrorKind, Result};
use crate::key::{validate as validate_key, validate_prefix};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use futures::StreamExt;
use serde_json::Value;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
const MAX_CONNECTIONS: u32 = 5;

/// SQLite storage backend.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    name: String,
    pool: SqlitePool,
}

impl SqliteBackend {
    async fn new(name: String, options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Apply the query-based PRAGMAs to every pooled connection, not
            // only the first one.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::BackendError("could not open sqlite database".to_string()))?;
        let backend = Self { name, pool };
        backend.migrate().await?;
        Ok(backend)
    }

    /// Open (creating if missing) the database file at `path`.
    pub async fn connect(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).create_if_missing(true);
        Self::new(name.into(), options, None).await
    }

    /// Connect to an in-memory database.
    ///
    /// Not `#[cfg(test)]` so that other crates can use it in their tests.
    pub async fn connect_in_memory(name: impl Into<String>) -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every connection to ":memory:" is its own database.
        Self::new(name.into(), options, Some(1)).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // Concurrent writers from the cache's background tasks can briefly
            // contend for the single WAL writer slot.
            .busy_timeout(Duration::from_millis(1500))
    }

    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -8192;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    #[instrument("performing database migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .or_raise(|| ErrorKind::BackendError("sqlite migration failed".to_string()))
    }

    /// Delete every expired row, returning how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv WHERE expire_at IS NOT NULL AND expire_at <= ?1")
            .bind(clock::now_millis())
            .execute(&self.pool)
            .await
            .or_raise(|| self.failed("purge"))?;
        Ok(result.rows_affected())
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }

    fn failed(&self, op: &str) -> ErrorKind {
        ErrorKind::BackendError(format!("sqlite {op} failed on backend {}", self.name))
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = validate_key(key)?;
        let now = clock::now_millis();
        let row: Option<(String, Option<i64>)> = sqlx::query_as("SELECT value, expire_at FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| self.failed("select"))?;
        let Some((raw, expire_at)) = row else {
            return Ok(None);
        };
        if expire_at.is_some_and(|at| at <= now) {
            // Guard against deleting a value that was rewritten in the meantime.
            sqlx::query("DELETE FROM kv WHERE key = ?1 AND expire_at <= ?2")
                .bind(key)
                .bind(now)
                .execute(&self.pool)
                .await
                .or_raise(|| self.failed("delete"))?;
            return Ok(None);
        }
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(backend = %self.name, key, error = %e, "Ignoring corrupt row");
                Ok(None)
            },
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        let key = validate_key(key)?;
        let encoded = serde_json::to_string(value).or_raise(|| ErrorKind::Serialization(key.to_string()))?;
        let expire_at = ttl.map(|ttl| clock::expiry(clock::now_millis(), ttl));
        sqlx::query(
            r#"
                INSERT INTO kv (key, value, expire_at) VALUES (?1, ?2, ?3)
                ON CONFLICT (key) DO UPDATE SET value = excluded.value, expire_at = excluded.expire_at
            "#,
        )
        .bind(key)
        .bind(encoded)
        .bind(expire_at)
        .execute(&self.pool)
        .await
        .or_raise(|| self.failed("upsert"))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = validate_key(key)?;
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| self.failed("delete"))?;
        Ok(())
    }

    fn key_stream<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        if let Err(e) = validate_prefix(prefix) {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }

        Box::pin(stream! {
            // substr() rather than LIKE: keys may legitimately contain `%` and `_`.
            let mut rows = sqlx::query_scalar::<_, String>(
                "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 AND (expire_at IS NULL OR expire_at > ?2)",
            )
            .bind(prefix)
            .bind(clock::now_millis())
            .fetch(&self.pool);
            while let Some(row) = rows.next().await {
                match row {
                    Ok(key) => yield Ok(key),
                    Err(e) => {
                        yield Err(exn::Exn::from(ErrorKind::BackendError(format!("sqlite key listing failed: {e}"))));
                        break;
                    },
                }
            }
        })
    }
}
