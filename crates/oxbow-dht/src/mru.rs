//! Bounded recency-ordered map with age expiry.
//!
//! An [`MruCache`] keeps a position list (front = oldest insertion) alongside
//! a lookup map. The two always hold exactly the same key set, and position
//! timestamps are non-decreasing from front to back.
//!
//! Recency reflects *writes* only: [`MruCache::try_get`] never reorders.
//! Only [`MruCache::add`] moves a key to the tail.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A bounded map ordered by most-recent insertion.
#[derive(Debug)]
pub struct MruCache<K, V> {
    capacity: usize,
    max_age: Duration,
    order: VecDeque<(K, Instant)>,
    map: HashMap<K, V>,
}

impl<K, V> MruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache bounded by item count and entry age.
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            max_age,
            order: VecDeque::new(),
            map: HashMap::new(),
        }
    }

    /// Create a cache bounded by entry age only.
    pub fn unbounded(max_age: Duration) -> Self {
        Self::new(usize::MAX, max_age)
    }

    /// Insert a value, moving the key to the most-recent position.
    ///
    /// If the cache is at capacity and the key is not already present, the
    /// oldest entry is evicted and its key returned.
    pub fn add(&mut self, key: K, value: V) -> Option<K> {
        let mut evicted = None;
        if self.map.contains_key(&key) {
            self.drop_position(&key);
        } else if self.map.len() >= self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                self.map.remove(&oldest);
                evicted = Some(oldest);
            }
        }
        self.order.push_back((key.clone(), Instant::now()));
        self.map.insert(key, value);
        evicted
    }

    /// Look up a value without touching its position.
    pub fn try_get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Remove an entry. Returns whether it was present.
    pub fn remove(&mut self, key: &K) -> bool {
        if self.map.remove(key).is_some() {
            self.drop_position(key);
            true
        } else {
            false
        }
    }

    /// Remove every entry older than the age limit.
    ///
    /// Expired entries form a prefix of the position list; the sweep stops
    /// at the first entry still within its age and removes exactly the
    /// expired prefix. Returns the number of entries removed.
    pub fn expire_old(&mut self) -> usize {
        let mut removed = 0;
        while let Some((key, inserted)) = self.order.front() {
            if inserted.elapsed() <= self.max_age {
                break;
            }
            let key = key.clone();
            self.order.pop_front();
            self.map.remove(&key);
            removed += 1;
        }
        removed
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Insertion timestamp of the oldest entry.
    pub fn oldest_timestamp(&self) -> Option<Instant> {
        self.order.front().map(|(_, at)| *at)
    }

    /// Iterate over the stored values in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.map.values()
    }

    fn drop_position(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|(k, _)| k == key) {
            self.order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn cache(capacity: usize) -> MruCache<u32, String> {
        MruCache::new(capacity, Duration::from_secs(60))
    }

    #[test]
    fn test_eviction_removes_first_inserted() {
        let mut cache = cache(4);
        for i in 0..4 {
            assert_eq!(cache.add(i, format!("v{i}")), None);
        }
        let evicted = cache.add(4, "v4".to_string());
        assert_eq!(evicted, Some(0));
        assert_eq!(cache.len(), 4);
        assert!(cache.try_get(&0).is_none());
        assert!(cache.try_get(&4).is_some());
    }

    #[test]
    fn test_readd_moves_to_tail() {
        let mut cache = cache(3);
        cache.add(1, "a".into());
        cache.add(2, "b".into());
        cache.add(3, "c".into());
        // Re-adding 1 makes 2 the oldest.
        cache.add(1, "a2".into());
        let evicted = cache.add(4, "d".into());
        assert_eq!(evicted, Some(2));
        assert_eq!(cache.try_get(&1).map(String::as_str), Some("a2"));
    }

    #[test]
    fn test_try_get_does_not_reorder() {
        let mut cache = cache(2);
        cache.add(1, "a".into());
        cache.add(2, "b".into());
        // Reads must not rescue 1 from eviction.
        assert!(cache.try_get(&1).is_some());
        let evicted = cache.add(3, "c".into());
        assert_eq!(evicted, Some(1));
    }

    #[test]
    fn test_remove() {
        let mut cache = cache(2);
        cache.add(1, "a".into());
        assert!(cache.remove(&1));
        assert!(!cache.remove(&1));
        assert!(cache.is_empty());
        assert_eq!(cache.oldest_timestamp(), None);
    }

    #[test]
    fn test_expire_removes_exactly_the_expired_prefix() {
        let mut cache = MruCache::new(10, Duration::from_millis(40));
        cache.add(1, "a".to_string());
        cache.add(2, "b".to_string());
        sleep(Duration::from_millis(60));
        cache.add(3, "c".to_string());

        let removed = cache.expire_old();
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.try_get(&3).is_some());
        // The survivor is within its age.
        let oldest = cache.oldest_timestamp().expect("survivor");
        assert!(oldest.elapsed() <= Duration::from_millis(40));
    }

    #[test]
    fn test_expire_on_fresh_cache_is_noop() {
        let mut cache = cache(4);
        cache.add(1, "a".into());
        assert_eq!(cache.expire_old(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unbounded_grows_past_any_count() {
        let mut cache: MruCache<u32, u32> = MruCache::unbounded(Duration::from_secs(60));
        for i in 0..1000 {
            assert_eq!(cache.add(i, i), None);
        }
        assert_eq!(cache.len(), 1000);
    }
}
