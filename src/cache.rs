//! In-memory LRU cache with TTL, keyed by a blake3 digest.
//! Shared by the analysis service (L1) and the highlight cache.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

pub type CacheKey = [u8; 32];

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TtlCache<V> {
    inner: Mutex<LruCache<CacheKey, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    /// A zero capacity is clamped to one entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Look up a cached value. Returns None if absent or expired.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
            // Expired
            cache.pop(key);
        }
        None
    }

    pub fn insert(&self, key: CacheKey, value: V) {
        self.inner.lock().put(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Digest of `parts`, each length-prefixed so part boundaries are unambiguous.
pub fn cache_key(parts: &[&[u8]]) -> CacheKey {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_inserted_value() {
        let cache = TtlCache::new(4, Duration::from_secs(60));
        let key = cache_key(&["model".as_bytes(), "text".as_bytes()]);
        assert!(cache.get(&key).is_none());
        cache.insert(key, "summary".to_string());
        assert_eq!(cache.get(&key).as_deref(), Some("summary"));
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = TtlCache::new(4, Duration::ZERO);
        let key = cache_key(&["x".as_bytes()]);
        cache.insert(key, 1u32);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = TtlCache::new(2, Duration::from_secs(60));
        let a = cache_key(&["a".as_bytes()]);
        let b = cache_key(&["b".as_bytes()]);
        let c = cache_key(&["c".as_bytes()]);
        cache.insert(a, 1);
        cache.insert(b, 2);
        assert_eq!(cache.get(&a), Some(1));
        cache.insert(c, 3);
        assert!(cache.get(&b).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = TtlCache::new(0, Duration::from_secs(60));
        cache.insert(cache_key(&["a".as_bytes()]), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn key_depends_on_part_boundaries() {
        let split_late = cache_key(&["a|b".as_bytes(), "c".as_bytes()]);
        let split_early = cache_key(&["a".as_bytes(), "b|c".as_bytes()]);
        assert_ne!(split_late, split_early);
        assert_eq!(split_late, cache_key(&["a|b".as_bytes(), "c".as_bytes()]));
        assert_ne!(cache_key(&["ab".as_bytes()]), cache_key(&["a".as_bytes(), "b".as_bytes()]));
    }
}
