//! Two-tier cache for hot reads.
//!
//! The volatile tier lives in process memory and is bounded by an LRU limit.
//! The optional persistent tier is any storage backend, so cached values can
//! survive a restart. Expiry is tracked per entry in both tiers and enforced
//! lazily on read, plus periodically by a background sweep.

mod cleanup;
mod entry;
pub mod error;
mod key;
mod tiered;
pub mod ttl;

pub use crate::cleanup::CleanupHandle;
pub use crate::entry::CacheEntry;
pub use crate::key::{cache_key, persistent_key, sanitize};
pub use crate::tiered::{CacheConfig, CacheStats, CleanupReport, TieredCache};
