//! Read-only storage backend.
//!
//! This module provides a storage backend implementation that wraps other
//! implementations and prevents write operations from executing, but
//! indicating success on return.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::{BackendHandle, StorageBackend, backend::KeyStream, error::Result};

/// Read-only storage backend.
///
/// Wraps another backend and silently drops all write operations, logging an
/// [`info event`](tracing::Event). Used for dry runs of maintenance commands.
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}
impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StorageBackend for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, _value: &Value, ttl: Option<Duration>) -> Result<()> {
        tracing::info!(key, ttl = ?ttl, "Skipping write during read-only mode");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tracing::info!(key, "Skipping delete during read-only mode");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    fn key_stream<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        self.inner.key_stream(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reads_pass_through_and_writes_are_dropped() {
        let inner: BackendHandle = Arc::new(MemoryBackend::with_entries([("admin/config", json!({"a": 1}))]));
        let backend = ReadOnlyBackend::new(inner.clone());
        assert_eq!(backend.get("admin/config").await.unwrap(), Some(json!({"a": 1})));
        backend.set("admin/config", &json!({"a": 2}), None).await.unwrap();
        backend.delete("admin/config").await.unwrap();
        backend.set("new", &json!(1), None).await.unwrap();
        assert_eq!(inner.get("admin/config").await.unwrap(), Some(json!({"a": 1})));
        assert!(!inner.exists("new").await.unwrap());
        assert_eq!(backend.keys("admin/").await.unwrap(), vec!["admin/config"]);
    }
}
