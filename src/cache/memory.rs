use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{AnalysisCache, CacheKey, CachedValue};
use crate::error::CacheResult;

/// Ceiling for TTLs too large to add to an `Instant`.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process cache backed by a sharded concurrent map.
///
/// Writes to distinct keys land on independent shards and never block each
/// other. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl AnalysisCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CachedValue>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }

        // Only remove if still expired; a writer may have replaced it meanwhile
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            debug!(key = %key, "Evicted expired cache entry");
        }

        Ok(None)
    }

    async fn put(&self, key: &CacheKey, value: CachedValue, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            expires_at: now.checked_add(ttl).unwrap_or_else(|| now + MAX_TTL),
        };

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(entry);
                } else {
                    debug!(key = %key, "Live cache entry kept");
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::EnhancedPrompt;

    fn prompt(text: &str) -> CachedValue {
        CachedValue::EnhancedPrompt(EnhancedPrompt::refined(text))
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_live_entry() {
        let cache = MemoryCache::new();
        let key = CacheKey::enhanced_prompt("h1");

        cache.put(&key, prompt("p"), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), Some(prompt("p")));
        assert_eq!(cache.get(&CacheKey::analysis("h1")).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_absent_and_removed_on_read() {
        let cache = MemoryCache::new();
        let key = CacheKey::enhanced_prompt("h1");

        cache.put(&key, prompt("p"), Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_keeps_live_entry() {
        let cache = MemoryCache::new();
        let key = CacheKey::enhanced_prompt("h1");

        cache.put(&key, prompt("first"), Duration::from_secs(10)).await.unwrap();
        cache.put(&key, prompt("second"), Duration::from_secs(10)).await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), Some(prompt("first")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_replaces_expired_entry() {
        let cache = MemoryCache::new();
        let key = CacheKey::enhanced_prompt("h1");

        cache.put(&key, prompt("first"), Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        cache.put(&key, prompt("second"), Duration::from_secs(10)).await.unwrap();

        assert_eq!(cache.get(&key).await.unwrap(), Some(prompt("second")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryCache::new();

        cache
            .put(&CacheKey::analysis("a"), prompt("a"), Duration::from_secs(5))
            .await
            .unwrap();
        cache
            .put(&CacheKey::analysis("b"), prompt("b"), Duration::from_secs(50))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_to_distinct_keys() {
        let cache = MemoryCache::new();
        let mut handles = Vec::new();

        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let key = CacheKey::analysis(format!("hash-{}", i));
                cache
                    .put(&key, prompt(&i.to_string()), Duration::from_secs(60))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(cache.len(), 16);
    }
}
