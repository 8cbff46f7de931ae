//! The unit stored by both cache tiers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A cached value with its expiry and last access time (epoch millis).
///
/// This is also the exact document written to the persistent tier:
/// `{"category": .., "key": .., "data": .., "expireTime": .., "lastAccessTime": ..}`.
///
/// Storage keys of the persistent tier are sanitized, so several
/// `(category, key)` pairs can map onto one document. The unsanitized owner
/// recorded in the entry decides whom a document belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub data: Value,
    #[serde(rename = "expireTime", default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<i64>,
    #[serde(rename = "lastAccessTime", default)]
    pub last_access_time: i64,
}

impl CacheEntry {
    pub fn new(data: Value, ttl: Option<Duration>, now: i64) -> Self {
        Self {
            category: None,
            key: None,
            data,
            expire_time: ttl.map(|ttl| reel_storage::clock::expiry(now, ttl)),
            last_access_time: now,
        }
    }

    /// Record which `(category, key)` this entry was written for.
    pub fn owned_by(mut self, category: &str, key: &str) -> Self {
        self.category = Some(category.to_string());
        self.key = Some(key.to_string());
        self
    }

    /// Entries without a recorded owner belong to nobody.
    pub fn belongs_to(&self, category: &str, key: &str) -> bool {
        self.category.as_deref() == Some(category) && self.key.as_deref() == Some(key)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expire_time.is_some_and(|at| at <= now)
    }
}
