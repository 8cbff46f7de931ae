//! Background cleanup task management.

use crate::tiered::TieredCache;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle to a running cleanup task.
///
/// Dropping the handle cancels the task without waiting for it; use
/// [`stop()`](Self::stop) to wait until it has actually finished.
pub struct CleanupHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    /// Cancel the task and wait for it to exit. A sweep in progress finishes
    /// its current entry first.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl TieredCache {
    /// Start a task that periodically removes expired entries from both
    /// tiers and trims the volatile tier.
    ///
    /// The task holds only a weak reference, so it also exits on its own once
    /// the cache has been dropped. A zero `interval` (or none given) falls
    /// back to the configured cleanup interval.
    pub fn start_cleanup(self: &Arc<Self>, interval: Option<Duration>) -> CleanupHandle {
        let period = interval.filter(|i| !i.is_zero()).unwrap_or(self.config().cleanup_interval);
        let token = CancellationToken::new();
        let cache = Arc::downgrade(self);
        let task = tokio::spawn(run(cache, period, token.clone()));
        CleanupHandle {
            token,
            task: Some(task),
        }
    }
}

async fn run(cache: Weak<TieredCache>, period: Duration, token: CancellationToken) {
    // First sweep one period after start, not immediately.
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }
        let Some(cache) = cache.upgrade() else {
            break;
        };
        tokio::select! {
            _ = token.cancelled() => break,
            result = cache.clear_expired() => match result {
                Ok(report) => {
                    let trimmed = cache.trim().await;
                    tracing::debug!(
                        volatile = report.volatile,
                        persistent = report.persistent,
                        trimmed,
                        "Cache cleanup finished"
                    );
                },
                Err(e) => tracing::warn!(error = %e, "Cache cleanup failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{CacheConfig, TieredCache};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cleanup_removes_expired_entries() {
        let cache = Arc::new(TieredCache::new(CacheConfig::default(), None));
        cache.set("c", "short", json!(1), Some(Duration::from_millis(10))).await;
        cache.set("c", "forever", json!(2), None).await;
        let handle = cache.start_cleanup(Some(Duration::from_millis(20)));
        assert!(handle.is_running());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.stats().await.volatile_entries, 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_ends_the_task() {
        let cache = Arc::new(TieredCache::new(CacheConfig::default(), None));
        let handle = cache.start_cleanup(Some(Duration::from_secs(3600)));
        tokio::time::timeout(Duration::from_secs(1), handle.stop()).await.unwrap();
    }

    #[tokio::test]
    async fn test_task_exits_when_cache_is_dropped() {
        let cache = Arc::new(TieredCache::new(CacheConfig::default(), None));
        let handle = cache.start_cleanup(Some(Duration::from_millis(10)));
        drop(cache);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_running());
    }
}
