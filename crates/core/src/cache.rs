//! Explicit, injected TTL cache.
//!
//! Used for per-host domain classifications and per-URL insight results.
//! Instances are owned by the process context and passed to whoever needs
//! them; there is no process-wide singleton.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Bounded key/value cache whose entries expire after a fixed TTL.
///
/// Expiry is checked on read. When full, the least recently used entry is
/// evicted.
pub struct TtlCache<K: Hash + Eq, V> {
    ttl: Duration,
    entries: Mutex<LruCache<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Create a cache. A `capacity` of zero is treated as one.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch a live entry, dropping it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((expires, value)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires = Instant::now() + self.ttl;
        self.entries.lock().put(key, (expires, value));
    }

    /// Number of entries, including ones that expired but were not yet read.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_inserted_value() {
        let cache = TtlCache::new(Duration::from_secs(60), 4);
        cache.insert("ads.example", true);
        assert_eq!(cache.get(&"ads.example"), Some(true));
        assert_eq!(cache.get(&"cdn.example"), None);
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = TtlCache::new(Duration::ZERO, 4);
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn reinserting_existing_key_does_not_evict() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);

        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn zero_capacity_holds_one_entry() {
        let cache = TtlCache::new(Duration::from_secs(60), 0);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"b"), Some(2));
    }
}
