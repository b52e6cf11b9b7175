//! Bounded memoization cache with time-based expiry.
//!
//! Backs the GitLab client's handle and lookup caches. Entries are evicted
//! least-recently-used when full and dropped on read once older than the
//! TTL; there is no explicit invalidation.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;

pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<LruCache<K, (Instant, V)>>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let (stored_at, value) = entries.get(key)?;
        if stored_at.elapsed() < self.ttl {
            return Some(value.clone());
        }
        entries.pop(key);
        None
    }

    pub async fn insert(&self, key: K, value: V) {
        self.entries
            .lock()
            .await
            .put(key, (Instant::now(), value));
    }

    /// Return the cached value or compute, store and return a fresh one.
    /// Concurrent misses may both compute; the last write wins.
    pub async fn get_or_try_insert<E, F, Fut>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }
        let value = load().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expires_entries_after_ttl() {
        let cache = TtlCache::new(4, Duration::from_millis(20));
        cache.insert("project", 1).await;
        assert_eq!(cache.get(&"project").await, Some(1));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&"project").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache = TtlCache::new(1, Duration::from_secs(60));
        cache.insert(1, "a").await;
        cache.insert(2, "b").await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&1).await, None);
        assert_eq!(cache.get(&2).await, Some("b"));
    }

    #[tokio::test]
    async fn loads_once_while_fresh() {
        let cache = TtlCache::new(8, Duration::from_secs(60));
        let mut loads = 0;

        for _ in 0..3 {
            let value: Result<_, ()> = cache
                .get_or_try_insert(7, || {
                    loads += 1;
                    async { Ok("job") }
                })
                .await;
            assert_eq!(value, Ok("job"));
        }
        assert_eq!(loads, 1);
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let cache: TtlCache<i32, i32> = TtlCache::new(8, Duration::from_secs(60));
        let result = cache.get_or_try_insert(1, || async { Err("boom") }).await;
        assert_eq!(result, Err("boom"));
        assert_eq!(cache.len().await, 0);
    }
}
