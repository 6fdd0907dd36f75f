//! Bounded TTL cache for static upstream assets
//!
//! The cache is injected into the pipeline as an `Arc<dyn AssetStore>` so it
//! can be swapped for a no-op (caching disabled, tests) or a distributed
//! implementation without touching call sites.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::config::CacheConfig;

/// A cached payload handed back to readers. Cloning is cheap (`Bytes`).
#[derive(Debug, Clone)]
pub struct CachedAsset {
    pub payload: Bytes,
    pub content_type: String,
}

/// Capability interface for the asset cache
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Fetch a fresh entry for the absolute URL, if one exists
    async fn get(&self, url: &str) -> Option<CachedAsset>;

    /// Store a payload under the absolute URL. Oversized payloads are
    /// rejected silently; a write race on the same key may let either
    /// writer win.
    async fn put(&self, url: &str, payload: Bytes, content_type: &str);

    /// Number of live entries (stale ones included until eviction)
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct CacheEntry {
    payload: Bytes,
    content_type: String,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// In-memory `AssetStore` bounded by entry count, payload size, and TTL
pub struct AssetCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    max_asset_bytes: usize,
}

impl AssetCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_limits(config.ttl(), config.max_entries, config.max_asset_bytes)
    }

    pub fn with_limits(ttl: Duration, max_entries: usize, max_asset_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            max_asset_bytes,
        }
    }

    /// Drop the oldest ~20% of entries by creation time to make room
    fn evict_oldest(&self) {
        let count = (self.max_entries / 5).max(1);

        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().created_at))
            .collect();
        by_age.sort_by_key(|(_, created_at)| *created_at);

        for (key, _) in by_age.into_iter().take(count) {
            self.entries.remove(&key);
        }

        debug!("Evicted {} oldest cache entries", count);
    }
}

#[async_trait]
impl AssetStore for AssetCache {
    async fn get(&self, url: &str) -> Option<CachedAsset> {
        let entry = self.entries.get(url)?;
        if entry.is_expired(self.ttl) {
            drop(entry);
            self.entries.remove(url);
            debug!(url, "Cache miss (expired)");
            return None;
        }

        debug!(url, "Cache hit");
        Some(CachedAsset {
            payload: entry.payload.clone(),
            content_type: entry.content_type.clone(),
        })
    }

    async fn put(&self, url: &str, payload: Bytes, content_type: &str) {
        if payload.len() > self.max_asset_bytes {
            debug!(url, size = payload.len(), "Payload exceeds cache ceiling");
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }

        self.entries.insert(
            url.to_string(),
            CacheEntry {
                payload,
                content_type: content_type.to_string(),
                created_at: Instant::now(),
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// `AssetStore` that stores nothing; used when caching is disabled
pub struct NoopStore;

#[async_trait]
impl AssetStore for NoopStore {
    async fn get(&self, _url: &str) -> Option<CachedAsset> {
        None
    }

    async fn put(&self, _url: &str, _payload: Bytes, _content_type: &str) {}

    fn len(&self) -> usize {
        0
    }
}

/// Build the store the configuration asks for
pub fn build_store(config: &CacheConfig) -> Arc<dyn AssetStore> {
    if config.enabled {
        Arc::new(AssetCache::new(config))
    } else {
        Arc::new(NoopStore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_ms: u64, max_entries: usize, max_bytes: usize) -> AssetCache {
        AssetCache::with_limits(Duration::from_millis(ttl_ms), max_entries, max_bytes)
    }

    #[tokio::test]
    async fn test_put_then_get_returns_identical_payload() {
        let cache = cache(1_000, 8, 1024);
        let payload = Bytes::from_static(b"\x89PNG fake image bytes");

        cache
            .put("https://example.com/a.png", payload.clone(), "image/png")
            .await;

        let hit = cache.get("https://example.com/a.png").await.unwrap();
        assert_eq!(hit.payload, payload);
        assert_eq!(hit.content_type, "image/png");
    }

    #[tokio::test]
    async fn test_get_miss_for_unknown_url() {
        let cache = cache(1_000, 8, 1024);
        assert!(cache.get("https://example.com/missing.js").await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = cache(20, 8, 1024);
        cache
            .put("https://example.com/a.css", Bytes::from_static(b"body{}"), "text/css")
            .await;

        assert!(cache.get("https://example.com/a.css").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("https://example.com/a.css").await.is_none());
        // The stale entry was dropped on read
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let cache = cache(1_000, 8, 16);
        cache
            .put(
                "https://example.com/big.js",
                Bytes::from(vec![0u8; 64]),
                "text/javascript",
            )
            .await;

        assert!(cache.get("https://example.com/big.js").await.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_eviction_drops_oldest() {
        let cache = cache(60_000, 5, 1024);

        for i in 0..5 {
            cache
                .put(
                    &format!("https://example.com/{i}.js"),
                    Bytes::from_static(b"x"),
                    "text/javascript",
                )
                .await;
            // Distinct creation order
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(cache.len(), 5);

        cache
            .put("https://example.com/new.js", Bytes::from_static(b"y"), "text/javascript")
            .await;

        // Oldest entry made room; the newcomer and the youngest survivors remain
        assert!(cache.get("https://example.com/0.js").await.is_none());
        assert!(cache.get("https://example.com/new.js").await.is_some());
        assert!(cache.len() <= 5);
    }

    #[test]
    fn test_noop_store_never_stores() {
        tokio_test::block_on(async {
            let store = NoopStore;
            store
                .put("https://example.com/a.js", Bytes::from_static(b"x"), "text/javascript")
                .await;
            assert!(store.get("https://example.com/a.js").await.is_none());
            assert!(store.is_empty());
        });
    }
}
