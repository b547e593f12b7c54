//! Files API: upload bytes once, reference them by id in any later turn.

use serde::Deserialize;
use tracing::{debug, info};

use quill_core::retry::RetryPolicy;

use crate::client::{check_status, AnthropicClient, ClaudeError};

/// Handle returned by an upload.
#[derive(Debug, Clone, Deserialize)]
pub struct FileHandle {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[derive(Clone)]
pub struct FilesClient {
    inner: AnthropicClient,
}

impl FilesClient {
    pub fn new(api_key: String, base_url: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            inner: AnthropicClient::new(api_key, base_url, retry),
        }
    }

    pub fn from_client(inner: AnthropicClient) -> Self {
        Self { inner }
    }

    fn retry(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    /// Upload bytes; returns the opaque file id used in content blocks.
    pub async fn upload(
        &self,
        filename: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<FileHandle, ClaudeError> {
        let url = format!("{}/v1/files", self.inner.base_url);
        let handle: FileHandle = self
            .retry()
            .run("files_upload", ClaudeError::is_retryable, || {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(filename.to_string())
                    .mime_str(mime_type)
                    .unwrap_or_else(|_| {
                        reqwest::multipart::Part::bytes(bytes.clone())
                            .file_name(filename.to_string())
                    });
                let form = reqwest::multipart::Form::new().part("file", part);
                let req = self.inner.headers(self.inner.client.post(&url)).multipart(form);
                async move {
                    let resp = check_status(req.send().await?).await?;
                    resp.json::<FileHandle>()
                        .await
                        .map_err(|e| ClaudeError::Parse(e.to_string()))
                }
            })
            .await?;

        info!(file_id = %handle.id, filename, size = handle.size_bytes, "file uploaded");
        Ok(handle)
    }

    /// Download file content by id.
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>, ClaudeError> {
        let url = format!("{}/v1/files/{file_id}/content", self.inner.base_url);
        let bytes = self
            .retry()
            .run("files_download", ClaudeError::is_retryable, || async {
                let resp = self
                    .inner
                    .headers(self.inner.client.get(&url))
                    .send()
                    .await?;
                let resp = check_status(resp).await?;
                Ok(resp.bytes().await?.to_vec())
            })
            .await?;
        debug!(file_id, size = bytes.len(), "file downloaded");
        Ok(bytes)
    }

    pub async fn delete(&self, file_id: &str) -> Result<(), ClaudeError> {
        let url = format!("{}/v1/files/{file_id}", self.inner.base_url);
        self.retry()
            .run("files_delete", ClaudeError::is_retryable, || async {
                let resp = self
                    .inner
                    .headers(self.inner.client.delete(&url))
                    .send()
                    .await?;
                check_status(resp).await?;
                Ok(())
            })
            .await?;
        debug!(file_id, "file deleted");
        Ok(())
    }
}
