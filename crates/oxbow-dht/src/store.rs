//! Two-tier local value store.
//!
//! Every stored value enters the size-bounded **cache tier**. A value is
//! *promoted* into the count-unbounded, age-bounded **long-term tier** when
//! the owner is among the k closest known peers to its key; a value whose
//! owner is the single closest peer is additionally marked primary
//! (owner-of-record). That placement decision needs the routing table, so
//! it is made by the store task in `oxbow-node`; this structure only holds
//! the tiers.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use oxbow_types::Key;

use crate::mru::MruCache;

/// A value in the long-term tier.
#[derive(Clone, Debug)]
struct StoredValue {
    data: Vec<u8>,
    /// Whether this node is the owner-of-record for the value.
    primary: bool,
}

/// Counters reported by [`ValueStore::stats`].
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct StoreStats {
    /// Items in the cache tier.
    pub cache_items: usize,
    /// Items in the long-term tier.
    pub long_term_items: usize,
    /// Age of the oldest item across both tiers, in seconds.
    pub oldest_age_secs: Option<u64>,
    /// Total stored bytes across both tiers.
    pub total_bytes: usize,
}

/// The two-tier value store of one node.
pub struct ValueStore {
    cache: MruCache<Key, Vec<u8>>,
    long_term: MruCache<Key, StoredValue>,
}

impl ValueStore {
    /// Create a store with the given cache-tier capacity and age limit for
    /// both tiers.
    pub fn new(store_size: usize, max_age: Duration) -> Self {
        Self {
            cache: MruCache::new(store_size, max_age),
            long_term: MruCache::unbounded(max_age),
        }
    }

    /// Insert a value into the cache tier. Returns the evicted key, if the
    /// insertion pushed one out.
    pub fn insert_cache(&mut self, key: Key, data: Vec<u8>) -> Option<Key> {
        let evicted = self.cache.add(key, data);
        if let Some(old) = evicted {
            debug!(key = %old, "cache tier evicted value");
        }
        evicted
    }

    /// Place a value in the long-term tier.
    pub fn promote(&mut self, key: Key, data: Vec<u8>, primary: bool) {
        self.long_term.add(key, StoredValue { data, primary });
    }

    /// Look up a value, consulting the cache tier first.
    pub fn get(&self, key: &Key) -> Option<&[u8]> {
        self.cache
            .try_get(key)
            .map(Vec::as_slice)
            .or_else(|| self.long_term.try_get(key).map(|v| v.data.as_slice()))
    }

    /// Whether this node is the owner-of-record for the key.
    pub fn is_primary(&self, key: &Key) -> bool {
        self.long_term.try_get(key).is_some_and(|v| v.primary)
    }

    /// Apply age expiry to both tiers. Returns the number of values removed.
    pub fn expire(&mut self) -> usize {
        let removed = self.cache.expire_old() + self.long_term.expire_old();
        if removed > 0 {
            debug!(removed, "expired stored values");
        }
        removed
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        let oldest = match (
            self.cache.oldest_timestamp(),
            self.long_term.oldest_timestamp(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let total_bytes = self.cache.values().map(Vec::len).sum::<usize>()
            + self.long_term.values().map(|v| v.data.len()).sum::<usize>();
        StoreStats {
            cache_items: self.cache.len(),
            long_term_items: self.long_term.len(),
            oldest_age_secs: oldest.map(|at| at.elapsed().as_secs()),
            total_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_cache_tier_roundtrip() {
        let mut store = ValueStore::new(10, Duration::from_secs(60));
        let key = Key::compute(b"hello");
        store.insert_cache(key, b"hello".to_vec());
        assert_eq!(store.get(&key), Some(b"hello".as_slice()));
        assert_eq!(store.get(&Key::compute(b"other")), None);
    }

    #[test]
    fn test_cache_tier_is_bounded() {
        let mut store = ValueStore::new(2, Duration::from_secs(60));
        let keys: Vec<Key> = (0..3)
            .map(|i: u32| Key::compute(&i.to_be_bytes()))
            .collect();
        store.insert_cache(keys[0], vec![0]);
        store.insert_cache(keys[1], vec![1]);
        let evicted = store.insert_cache(keys[2], vec![2]);
        assert_eq!(evicted, Some(keys[0]));
        assert_eq!(store.get(&keys[0]), None);
    }

    #[test]
    fn test_long_term_survives_cache_eviction() {
        let mut store = ValueStore::new(1, Duration::from_secs(60));
        let keep = Key::compute(b"keep");
        store.insert_cache(keep, b"keep".to_vec());
        store.promote(keep, b"keep".to_vec(), false);
        // Push `keep` out of the cache tier.
        store.insert_cache(Key::compute(b"new"), b"new".to_vec());
        assert_eq!(store.get(&keep), Some(b"keep".as_slice()));
        assert!(!store.is_primary(&keep));
    }

    #[test]
    fn test_primary_flag() {
        let mut store = ValueStore::new(4, Duration::from_secs(60));
        let key = Key::compute(b"mine");
        store.promote(key, b"mine".to_vec(), true);
        assert!(store.is_primary(&key));
    }

    #[test]
    fn test_expiry_empties_both_tiers() {
        let mut store = ValueStore::new(4, Duration::from_millis(40));
        let key = Key::compute(b"short-lived");
        store.insert_cache(key, b"v".to_vec());
        store.promote(key, b"v".to_vec(), false);
        sleep(Duration::from_millis(60));
        let removed = store.expire();
        assert_eq!(removed, 2);
        assert_eq!(store.get(&key), None);
    }

    #[test]
    fn test_stats() {
        let mut store = ValueStore::new(4, Duration::from_secs(60));
        assert_eq!(store.stats().oldest_age_secs, None);
        store.insert_cache(Key::compute(b"a"), vec![0; 10]);
        store.promote(Key::compute(b"b"), vec![0; 5], false);
        let stats = store.stats();
        assert_eq!(stats.cache_items, 1);
        assert_eq!(stats.long_term_items, 1);
        assert_eq!(stats.total_bytes, 15);
        assert!(stats.oldest_age_secs.is_some());
    }
}
