//! In-process LRU layer in front of the memo database.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use serde_json::Value;

use super::fingerprint::Fingerprint;

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries in the hot layer.
    pub size: usize,

    /// Maximum hot-layer capacity.
    pub capacity: usize,

    /// Lookups answered from memoized records.
    pub hits: u64,

    /// Lookups that found nothing (or were forced to).
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Recently used memo records, keyed by fingerprint.
pub struct HotCache {
    cache: LruCache<Fingerprint, Value>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HotCache {
    /// Creates a hot layer holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(cap),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks a record up, refreshing its recency.
    pub fn get(&mut self, key: &Fingerprint) -> Option<&Value> {
        self.cache.get(key)
    }

    /// Inserts or overwrites a record.
    pub fn insert(&mut self, key: Fingerprint, value: Value) {
        self.cache.put(key, value);
    }

    /// Drops one record.
    pub fn invalidate(&mut self, key: &Fingerprint) {
        self.cache.pop(key);
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.cache.len(),
            capacity: self.cache.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(n: u32) -> Fingerprint {
        Fingerprint::compute("test", &json!({ "n": n })).unwrap()
    }

    #[test]
    fn test_hot_cache_hit() {
        let mut cache = HotCache::new(10);
        cache.insert(key(1), json!("built"));

        assert_eq!(cache.get(&key(1)), Some(&json!("built")));
        assert!(cache.get(&key(2)).is_none());
    }

    #[test]
    fn test_hot_cache_lru_eviction() {
        let mut cache = HotCache::new(2);

        cache.insert(key(1), json!(1));
        cache.insert(key(2), json!(2));
        cache.insert(key(3), json!(3)); // evicts key(1)

        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
        assert!(cache.get(&key(3)).is_some());
    }

    #[test]
    fn test_hot_cache_invalidate_and_clear() {
        let mut cache = HotCache::new(10);
        cache.insert(key(1), json!(1));
        cache.insert(key(2), json!(2));

        cache.invalidate(&key(1));
        assert!(cache.get(&key(1)).is_none());

        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let mut cache = HotCache::new(0);
        cache.insert(key(1), json!(1));
        assert_eq!(cache.stats().capacity, 1);
        assert!(cache.get(&key(1)).is_some());
    }

    #[test]
    fn test_stats() {
        let cache = HotCache::new(10);
        cache.record_hit();
        cache.record_miss();
        cache.record_hit();

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.666).abs() < 0.01);
    }
}
