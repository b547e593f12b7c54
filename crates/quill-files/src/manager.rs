//! Canonical file retrieval across three tiers.
//!
//! A file id's prefix selects the source:
//! - `exec_…`  — ephemeral exec-cache artifact (bytes + metadata); a miss
//!   means the artifact expired.
//! - `file_…`  — LLM files API handle; when the UserFile row also carries a
//!   Telegram file id, the platform download is preferred (cheaper, no
//!   files-API egress).
//! - anything else — a bare platform token, resolved via the platform SDK
//!   with UserFile metadata when we have it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use quill_cache::{BytesCache, ExecCache};
use quill_claude::FilesClient;
use quill_core::{QuillError, Result};
use quill_store::{files, Store};

/// Where the bytes actually came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSourceTier {
    ExecCache,
    Telegram,
    FilesApi,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileMeta {
    pub filename: String,
    pub mime_type: String,
    pub file_size: usize,
    pub source: FileSourceTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claude_file_id: Option<String>,
    /// Free-form context carried in exec metadata (e.g. the generating code).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Seam to the messaging platform's file download API.
#[async_trait]
pub trait PlatformFiles: Send + Sync {
    /// Download by platform file id; returns (bytes, best-known filename).
    async fn download(&self, file_id: &str) -> Result<(Vec<u8>, String)>;
}

pub struct FileManager {
    store: Arc<Store>,
    exec_cache: Arc<ExecCache>,
    bytes_cache: Arc<BytesCache>,
    files_api: FilesClient,
    platform: Arc<dyn PlatformFiles>,
}

impl FileManager {
    pub fn new(
        store: Arc<Store>,
        exec_cache: Arc<ExecCache>,
        bytes_cache: Arc<BytesCache>,
        files_api: FilesClient,
        platform: Arc<dyn PlatformFiles>,
    ) -> Self {
        Self {
            store,
            exec_cache,
            bytes_cache,
            files_api,
            platform,
        }
    }

    /// Fetch bytes + metadata for any file id the LLM may hold.
    pub async fn get_file(&self, file_id: &str, use_cache: bool) -> Result<(Vec<u8>, FileMeta)> {
        if file_id.starts_with("exec_") {
            return self.get_exec_artifact(file_id);
        }

        if use_cache {
            if let Some(cached) = self.bytes_cache.get(file_id) {
                debug!(file_id, "bytes cache hit");
                if let Some(meta) = self.meta_for(file_id, cached.len())? {
                    return Ok((cached.as_ref().clone(), meta));
                }
            }
        }

        let (bytes, meta) = if file_id.starts_with("file_") {
            self.get_llm_file(file_id).await?
        } else {
            self.get_platform_file(file_id).await?
        };

        if use_cache {
            self.bytes_cache.put(file_id, Arc::new(bytes.clone()));
        }
        Ok((bytes, meta))
    }

    fn get_exec_artifact(&self, temp_id: &str) -> Result<(Vec<u8>, FileMeta)> {
        let meta_json = self.exec_cache.get_meta(temp_id).ok_or_else(|| {
            QuillError::FileNotFound(format!(
                "exec artifact {temp_id} not found (expired or never existed)"
            ))
        })?;
        let bytes = self.exec_cache.get_file(temp_id).ok_or_else(|| {
            QuillError::FileNotFound(format!("exec artifact {temp_id} has no cached bytes"))
        })?;

        let meta = FileMeta {
            filename: meta_json
                .get("filename")
                .and_then(|v| v.as_str())
                .unwrap_or(temp_id)
                .to_string(),
            mime_type: meta_json
                .get("mime_type")
                .and_then(|v| v.as_str())
                .unwrap_or("application/octet-stream")
                .to_string(),
            file_size: bytes.len(),
            source: FileSourceTier::ExecCache,
            claude_file_id: None,
            context: meta_json
                .get("context")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            preview: meta_json
                .get("preview")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        };
        Ok((bytes.as_ref().clone(), meta))
    }

    async fn get_llm_file(&self, claude_file_id: &str) -> Result<(Vec<u8>, FileMeta)> {
        let row = self
            .store
            .with_conn(|conn| files::get_by_claude_file_id(conn, claude_file_id))?
            .ok_or_else(|| {
                QuillError::FileNotFound(format!("no file record for {claude_file_id}"))
            })?;

        // Prefer the platform copy when we still hold a Telegram handle.
        if let Some(tg_id) = &row.telegram_file_id {
            match self.platform.download(tg_id).await {
                Ok((bytes, _)) => {
                    info!(claude_file_id, "served from platform tier");
                    let meta = FileMeta {
                        filename: row.filename.clone(),
                        mime_type: row.mime_type.clone(),
                        file_size: bytes.len(),
                        source: FileSourceTier::Telegram,
                        claude_file_id: Some(claude_file_id.to_string()),
                        context: None,
                        preview: None,
                    };
                    return Ok((bytes, meta));
                }
                Err(e) => {
                    debug!(claude_file_id, error = %e, "platform tier failed, trying files API");
                }
            }
        }

        let bytes = self
            .files_api
            .download(claude_file_id)
            .await
            .map_err(|e| QuillError::FileNotFound(format!("files API: {e}")))?;
        let meta = FileMeta {
            filename: row.filename,
            mime_type: row.mime_type,
            file_size: bytes.len(),
            source: FileSourceTier::FilesApi,
            claude_file_id: Some(claude_file_id.to_string()),
            context: None,
            preview: None,
        };
        Ok((bytes, meta))
    }

    async fn get_platform_file(&self, telegram_file_id: &str) -> Result<(Vec<u8>, FileMeta)> {
        // UserFile row first, for filename/MIME metadata.
        let row = self
            .store
            .with_conn(|conn| files::get_by_telegram_file_id(conn, telegram_file_id))?;

        let (bytes, downloaded_name) =
            self.platform.download(telegram_file_id).await.map_err(|e| {
                QuillError::FileNotFound(format!("platform download {telegram_file_id}: {e}"))
            })?;

        let (filename, mime_type, claude_file_id) = match row {
            Some(r) => (r.filename, r.mime_type, r.claude_file_id),
            None => {
                let mime = crate::kind::detect_mime(&bytes, &downloaded_name, None);
                (downloaded_name, mime, None)
            }
        };

        let meta = FileMeta {
            filename,
            mime_type,
            file_size: bytes.len(),
            source: FileSourceTier::Telegram,
            claude_file_id,
            context: None,
            preview: None,
        };
        Ok((bytes, meta))
    }

    /// Metadata-only lookup used on bytes-cache hits.
    fn meta_for(&self, file_id: &str, size: usize) -> Result<Option<FileMeta>> {
        let row = if file_id.starts_with("file_") {
            self.store
                .with_conn(|conn| files::get_by_claude_file_id(conn, file_id))?
        } else {
            self.store
                .with_conn(|conn| files::get_by_telegram_file_id(conn, file_id))?
        };
        Ok(row.map(|r| FileMeta {
            filename: r.filename,
            mime_type: r.mime_type,
            file_size: size,
            source: if file_id.starts_with("file_") {
                FileSourceTier::FilesApi
            } else {
                FileSourceTier::Telegram
            },
            claude_file_id: r.claude_file_id,
            context: None,
            preview: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::retry::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;

    struct NoPlatform;

    #[async_trait]
    impl PlatformFiles for NoPlatform {
        async fn download(&self, file_id: &str) -> Result<(Vec<u8>, String)> {
            Err(QuillError::FileNotFound(format!("offline: {file_id}")))
        }
    }

    fn manager() -> FileManager {
        FileManager::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(ExecCache::new(Duration::from_secs(60), 1024 * 1024)),
            Arc::new(BytesCache::new(Duration::from_secs(60), 16)),
            FilesClient::new(
                "key".into(),
                Some("http://127.0.0.1:1".into()),
                RetryPolicy::new(1, 0.001, 0.002),
            ),
            Arc::new(NoPlatform),
        )
    }

    #[tokio::test]
    async fn exec_artifact_roundtrip() {
        let m = manager();
        let temp_id = m
            .exec_cache
            .put(
                "plot.png",
                vec![1, 2, 3],
                json!({"filename": "plot.png", "mime_type": "image/png"}),
            )
            .unwrap();

        let (bytes, meta) = m.get_file(&temp_id, true).await.unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(meta.filename, "plot.png");
        assert_eq!(meta.mime_type, "image/png");
        assert_eq!(meta.source, FileSourceTier::ExecCache);
    }

    #[tokio::test]
    async fn expired_exec_artifact_is_file_not_found() {
        let m = manager();
        let err = m.get_file("exec_zzzzzzzz_gone.txt", true).await.unwrap_err();
        assert!(matches!(err, QuillError::FileNotFound(_)));
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn unknown_llm_file_is_file_not_found() {
        let m = manager();
        let err = m.get_file("file_does_not_exist", true).await.unwrap_err();
        assert!(matches!(err, QuillError::FileNotFound(_)));
    }
}
