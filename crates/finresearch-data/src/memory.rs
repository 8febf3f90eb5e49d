use moka::future::Cache;
use std::time::Duration;

/// In-memory response cache backed by moka.
///
/// Holds raw provider response bodies keyed by request URL (without the API key).
/// Entries are evicted after TTL or when capacity is reached.
#[derive(Clone)]
pub struct MemoryCache {
    inner: Cache<String, String>,
}

impl MemoryCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, value: String) {
        self.inner.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_get() {
        let cache = MemoryCache::new(100, Duration::from_secs(60));
        cache
            .insert("profile/ACME".to_string(), "[]".to_string())
            .await;

        assert_eq!(cache.get("profile/ACME").await, Some("[]".to_string()));
        assert_eq!(cache.get("profile/OTHER").await, None);
    }

    #[tokio::test]
    async fn invalidate() {
        let cache = MemoryCache::new(100, Duration::from_secs(60));
        cache.insert("k".to_string(), "v".to_string()).await;
        cache.invalidate("k").await;

        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let cache = MemoryCache::new(100, Duration::from_millis(50));
        cache.insert("k".to_string(), "v".to_string()).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get("k").await.is_none());
    }
}
