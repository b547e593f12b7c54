use std::hash::Hash;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Entry<V> {
    value: V,
    inserted: Instant,
    expires: Instant,
}

/// Concurrent TTL map with a soft entry cap.
///
/// Reads prune the entry they touch when expired; inserts over the cap evict
/// expired entries first, then the oldest by insertion time. Not strict LRU —
/// the callers only need boundedness, not recency precision.
pub struct TtlMap<K: Eq + Hash, V> {
    map: DashMap<K, Entry<V>>,
    max_entries: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlMap<K, V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            map: DashMap::new(),
            max_entries,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.map.get(key) {
            if entry.expires > Instant::now() {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        // expired — drop it
        self.map.remove(key);
        None
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        if self.map.len() >= self.max_entries {
            self.evict();
        }
        let now = Instant::now();
        self.map.insert(
            key,
            Entry {
                value,
                inserted: now,
                expires: now + ttl,
            },
        );
    }

    pub fn remove(&self, key: &K) {
        self.map.remove(key);
    }

    /// Mutate an entry in place if present and fresh. Returns false on miss.
    pub fn update<F: FnOnce(&mut V)>(&self, key: &K, f: F) -> bool {
        let now = Instant::now();
        match self.map.get_mut(key) {
            Some(mut entry) if entry.expires > now => {
                f(&mut entry.value);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn evict(&self) {
        let now = Instant::now();
        self.map.retain(|_, e| e.expires > now);
        if self.map.len() < self.max_entries {
            return;
        }
        // Still full of live entries: drop the oldest one.
        let oldest = self
            .map
            .iter()
            .min_by_key(|e| e.value().inserted)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.map.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_miss_after_ttl() {
        let m: TtlMap<String, i32> = TtlMap::new(16);
        m.insert("a".into(), 1, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(m.get(&"a".to_string()), None);
    }

    #[test]
    fn get_hit_within_ttl() {
        let m: TtlMap<String, i32> = TtlMap::new(16);
        m.insert("a".into(), 1, Duration::from_secs(60));
        assert_eq!(m.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn cap_evicts_oldest_live_entry() {
        let m: TtlMap<u32, u32> = TtlMap::new(2);
        m.insert(1, 1, Duration::from_secs(60));
        m.insert(2, 2, Duration::from_secs(60));
        m.insert(3, 3, Duration::from_secs(60));
        assert!(m.len() <= 2 + 1); // the new entry plus survivors
        assert_eq!(m.get(&1), None); // oldest was dropped
        assert_eq!(m.get(&3), Some(3));
    }

    #[test]
    fn update_misses_expired() {
        let m: TtlMap<String, i32> = TtlMap::new(16);
        m.insert("a".into(), 1, Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(!m.update(&"a".to_string(), |v| *v += 1));

        m.insert("b".into(), 1, Duration::from_secs(60));
        assert!(m.update(&"b".to_string(), |v| *v += 1));
        assert_eq!(m.get(&"b".to_string()), Some(2));
    }
}
