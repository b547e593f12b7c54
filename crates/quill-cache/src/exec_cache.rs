//! Ephemeral store for tool-generated artifacts.
//!
//! Keys: `exec:file:<temp_id>` for bytes, `exec:meta:<temp_id>` for JSON
//! metadata. Entries expire after the configured TTL (default 30 minutes)
//! and oversized payloads are refused at insert.

use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::ttl::TtlMap;

pub struct ExecCache {
    files: TtlMap<String, Arc<Vec<u8>>>,
    meta: TtlMap<String, Value>,
    ttl: Duration,
    max_size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecCacheError {
    #[error("artifact too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

impl ExecCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            files: TtlMap::new(512),
            meta: TtlMap::new(512),
            ttl,
            max_size,
        }
    }

    /// `exec_<8 random alphanumerics>_<original filename>`.
    pub fn make_temp_id(filename: &str) -> String {
        let tag: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        format!("exec_{tag}_{filename}")
    }

    /// Store bytes + metadata under a fresh temp_id. Returns the id.
    pub fn put(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mut meta: Value,
    ) -> Result<String, ExecCacheError> {
        if bytes.len() > self.max_size {
            return Err(ExecCacheError::TooLarge {
                size: bytes.len(),
                max: self.max_size,
            });
        }
        let temp_id = Self::make_temp_id(filename);
        if let Some(obj) = meta.as_object_mut() {
            obj.insert("temp_id".to_string(), Value::String(temp_id.clone()));
            obj.insert("size".to_string(), Value::from(bytes.len()));
        }
        self.files
            .insert(format!("exec:file:{temp_id}"), Arc::new(bytes), self.ttl);
        self.meta
            .insert(format!("exec:meta:{temp_id}"), meta, self.ttl);
        debug!(temp_id, "exec artifact cached");
        Ok(temp_id)
    }

    pub fn get_file(&self, temp_id: &str) -> Option<Arc<Vec<u8>>> {
        self.files.get(&format!("exec:file:{temp_id}"))
    }

    pub fn get_meta(&self, temp_id: &str) -> Option<Value> {
        self.meta.get(&format!("exec:meta:{temp_id}"))
    }

    pub fn remove(&self, temp_id: &str) {
        self.files.remove(&format!("exec:file:{temp_id}"));
        self.meta.remove(&format!("exec:meta:{temp_id}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn temp_id_shape() {
        let id = ExecCache::make_temp_id("report.csv");
        assert!(id.starts_with("exec_"));
        assert!(id.ends_with("_report.csv"));
        // exec_ + 8 chars + _ + filename
        assert_eq!(id.len(), 5 + 8 + 1 + "report.csv".len());
    }

    #[test]
    fn put_and_get_roundtrip() {
        let cache = ExecCache::new(Duration::from_secs(60), 1024);
        let id = cache
            .put("out.txt", b"hello".to_vec(), json!({"mime_type": "text/plain"}))
            .unwrap();
        assert_eq!(cache.get_file(&id).unwrap().as_slice(), b"hello");
        let meta = cache.get_meta(&id).unwrap();
        assert_eq!(meta["temp_id"], id);
        assert_eq!(meta["size"], 5);
        assert_eq!(meta["mime_type"], "text/plain");
    }

    #[test]
    fn oversized_artifact_refused() {
        let cache = ExecCache::new(Duration::from_secs(60), 4);
        let err = cache.put("big.bin", vec![0; 5], json!({})).unwrap_err();
        assert!(matches!(err, ExecCacheError::TooLarge { size: 5, max: 4 }));
    }

    #[test]
    fn expired_artifact_misses() {
        let cache = ExecCache::new(Duration::from_millis(0), 1024);
        let id = cache.put("x", b"y".to_vec(), json!({})).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get_file(&id).is_none());
        assert!(cache.get_meta(&id).is_none());
    }
}
