use std::time::{Duration, Instant};
use tracing::debug;

use crate::types::ProductListing;

/// Fixed key for the best-sellers feed, independent of any query.
pub const TRENDING_KEY: &str = "__trending__";

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Vec<ProductListing>,
    pub timestamp: Instant,
}

/// Time-boxed listing cache shared by search and the trending feed.
///
/// Staleness is judged purely by age: an entry read at or past `ttl` is
/// evicted and reported absent. Moka's own expiry uses the same TTL and only
/// bounds memory for keys that are never read again.
#[derive(Clone)]
pub struct ResultCache {
    entries: moka::future::Cache<String, CacheEntry>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: moka::future::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<ProductListing>> {
        let entry = self.entries.get(key).await?;
        if entry.timestamp.elapsed() >= self.ttl {
            debug!("evicting stale cache entry '{}'", key);
            self.entries.invalidate(key).await;
            return None;
        }
        Some(entry.data)
    }

    /// Store `data` stamped with the current time, replacing any prior entry.
    pub async fn put(&self, key: impl Into<String>, data: Vec<ProductListing>) {
        let entry = CacheEntry {
            data,
            timestamp: Instant::now(),
        };
        self.entries.insert(key.into(), entry).await;
    }

    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::tests::products;

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = ResultCache::new(Duration::from_secs(600));
        cache.put("mouse_4", products(2)).await;
        assert_eq!(cache.get("mouse_4").await, Some(products(2)));
        assert_eq!(cache.get("mouse_5").await, None);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let cache = ResultCache::new(Duration::from_secs(600));
        cache.put("mouse_4", products(2)).await;
        cache.put("mouse_4", products(3)).await;
        assert_eq!(cache.get("mouse_4").await.map(|d| d.len()), Some(3));
    }

    #[tokio::test]
    async fn test_stale_entry_is_absent() {
        let cache = ResultCache::new(Duration::from_millis(50));
        cache.put(TRENDING_KEY, products(5)).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get(TRENDING_KEY).await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_results_are_cached_too() {
        let cache = ResultCache::new(Duration::from_secs(600));
        cache.put("nothing_3", Vec::new()).await;
        assert_eq!(cache.get("nothing_3").await, Some(Vec::new()));
    }
}
