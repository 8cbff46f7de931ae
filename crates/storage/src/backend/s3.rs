//! S3-compatible storage backend.
//!
//! This module provides a storage backend implementation for S3-compatible
//! services including AWS S3, Backblaze B2, Cloudflare R2, MinIO and others.
//! Each key becomes one JSON object at `{prefix}/{key}.json`.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file.
//!
//! TODO: support `credentials: "profile:name"` in config to use AWS SDK
//! credential providers instead of explicit keys.

use super::KeyStream;
use super::envelope::{self, Unwrapped};
use crate::StorageBackend;
use crate::clock;
use crate::error::{ErrorKind, Result};
use crate::key::{validate as validate_key, validate_prefix};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    primitives::ByteStream,
};
use exn::ResultExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
const EXTENSION: &str = ".json";

/// Connection details for [`S3Backend::new`].
#[derive(Debug, Clone)]
pub struct S3Options {
    pub bucket: String,
    /// Optional key prefix (acts as a virtual directory).
    pub prefix: Option<String>,
    /// AWS region or provider-specific region (e.g. `us-west-004`).
    pub region: String,
    /// Custom endpoint URL for S3-compatible services.
    pub endpoint: Option<String>,
    pub key_id: String,
    pub key_secret: String,
}

/// S3-compatible storage backend.
///
/// Expiry is not native to object storage, so values written with a TTL are
/// wrapped in an expiry envelope and checked when read back.
///
/// # Examples
///
/// ```no_run
/// use reel_storage::backend::{S3Backend, S3Options};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new("objects", S3Options {
///     bucket: "my-bucket".to_string(),
///     prefix: Some("reel".to_string()),
///     region: "us-west-004".to_string(),
///     endpoint: Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     key_id: "access_key_id".to_string(),
///     key_secret: "secret_access_key".to_string(),
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend. No request is made until first use.
    pub fn new(name: impl Into<String>, options: S3Options) -> Result<Self> {
        let prefix = options
            .prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .map(|p| validate_key(&p).map(str::to_string))
            .transpose()?;
        let credentials = Credentials::new(options.key_id, options.key_secret, None, None, "reel-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(options.region))
            // 1 initial attempt + 3 retries with exponential backoff
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing works with every S3-compatible service.
            .force_path_style(true);
        if let Some(endpoint_url) = options.endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: options.bucket,
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    fn full_key(&self, key: &str) -> Result<String> {
        let key = validate_key(key)?;
        Ok(object_key(self.prefix.as_deref(), key))
    }

    fn list_prefix(&self, prefix: &str) -> String {
        match &self.prefix {
            Some(base) => format!("{base}/{prefix}"),
            None => prefix.to_string(),
        }
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    fn network(&self, op: &str, key: &str) -> ErrorKind {
        ErrorKind::Network(format!("S3 {op} failed for {key:?} on backend {}", self.name))
    }
}

fn object_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}/{key}{EXTENSION}"),
        None => format!("{key}{EXTENSION}"),
    }
}

/// Map an object key back to a storage key, skipping objects this backend
/// didn't write.
fn storage_key<'a>(prefix: Option<&str>, object: &'a str) -> Option<&'a str> {
    let relative = match prefix {
        Some(prefix) => object.strip_prefix(prefix)?.strip_prefix('/')?,
        None => object,
    };
    let key = relative.strip_suffix(EXTENSION)?;
    validate_key(key).ok()
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let object = self.full_key(key)?;
        let _permit = self.acquire_permit().await?;
        let response = self.client.get_object().bucket(&self.bucket).key(&object).send().await;
        let output = match response {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => return Ok(None),
            Err(e) => return Err(e).or_raise(|| self.network("GET", key)),
        };
        let bytes = output.body.collect().await.or_raise(|| self.network("GET body", key))?.into_bytes();
        let document: Value = match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                tracing::warn!(backend = %self.name, key, error = %e, "Ignoring corrupt object");
                return Ok(None);
            },
        };
        match envelope::unwrap(document, clock::now_millis()) {
            Unwrapped::Live(value) => Ok(Some(value)),
            Unwrapped::Expired => {
                drop(_permit);
                self.delete(key).await?;
                Ok(None)
            },
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        let object = self.full_key(key)?;
        let document = envelope::wrap(value, ttl, clock::now_millis());
        let body = serde_json::to_vec(&document).or_raise(|| ErrorKind::Serialization(key.to_string()))?;
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object)
            .content_type("application/json")
            .body(ByteStream::from(body))
            .send()
            .await
            .or_raise(|| self.network("PUT", key))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let object = self.full_key(key)?;
        let _permit = self.acquire_permit().await?;
        // DeleteObject succeeds for missing objects.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object)
            .send()
            .await
            .or_raise(|| self.network("DELETE", key))?;
        Ok(())
    }

    fn key_stream<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        if let Err(e) = validate_prefix(prefix) {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }
        let list_prefix = self.list_prefix(prefix);

        Box::pin(stream! {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&list_prefix)
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(exn::Exn::from(ErrorKind::Network(format!("S3 LIST failed: {e}"))));
                        break;
                    },
                };
                for object in page.contents() {
                    if let Some(key) = object.key().and_then(|o| storage_key(self.prefix.as_deref(), o)) {
                        yield Ok(key.to_string());
                    }
                }
            }
        })
    }
}
