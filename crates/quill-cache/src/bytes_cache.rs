//! Downloaded-file bytes cache, keyed by source file id.
//!
//! Bounded and TTL'd; the FileManager bypasses it when `use_cache=false`.

use std::sync::Arc;
use std::time::Duration;

use crate::ttl::TtlMap;

pub struct BytesCache {
    inner: TtlMap<String, Arc<Vec<u8>>>,
    ttl: Duration,
}

impl BytesCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: TtlMap::new(max_entries),
            ttl,
        }
    }

    pub fn get(&self, file_id: &str) -> Option<Arc<Vec<u8>>> {
        self.inner.get(&file_id.to_string())
    }

    pub fn put(&self, file_id: &str, bytes: Arc<Vec<u8>>) {
        self.inner.insert(file_id.to_string(), bytes, self.ttl);
    }

    pub fn invalidate(&self, file_id: &str) {
        self.inner.remove(&file_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_invalidate() {
        let cache = BytesCache::new(Duration::from_secs(60), 8);
        cache.put("abc", Arc::new(vec![1, 2, 3]));
        assert_eq!(cache.get("abc").unwrap().as_slice(), &[1, 2, 3]);
        cache.invalidate("abc");
        assert!(cache.get("abc").is_none());
    }
}
