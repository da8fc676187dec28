//! LRU cache for embeddings
//!
//! Repeated texts (category names, recurring queries, reinforced facts) are
//! embedded once per process. Shared between tasks behind a std mutex; the
//! lock is never held across an await.

use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of cached embeddings
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Hit/miss counters for the embedding cache
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug)]
pub struct EmbeddingCache {
    cache: Mutex<LruCache<String, Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// A capacity of 0 falls back to [`DEFAULT_CACHE_CAPACITY`]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a text, counting the hit or miss
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let found = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(text)
            .cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    pub fn put(&self, text: String, embedding: Vec<f32>) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(text, embedding);
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: cache.len(),
            capacity: cache.cap().get(),
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_and_misses() {
        let cache = EmbeddingCache::new(10);
        assert!(cache.get("seoul").is_none());

        cache.put("seoul".to_string(), vec![1.0, 0.0]);
        assert_eq!(cache.get("seoul"), Some(vec![1.0, 0.0]));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.len, 1);
    }

    #[test]
    fn test_evicts_least_recent() {
        let cache = EmbeddingCache::new(2);
        cache.put("a".to_string(), vec![1.0]);
        cache.put("b".to_string(), vec![2.0]);
        cache.get("a");
        cache.put("c".to_string(), vec![3.0]);

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        assert_eq!(EmbeddingCache::new(0).stats().capacity, DEFAULT_CACHE_CAPACITY);
    }
}
