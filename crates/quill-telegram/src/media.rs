//! Platform file downloads via `get_file` + `download_file`.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use tracing::warn;

use quill_core::{QuillError, Result};
use quill_files::PlatformFiles;

/// Hard cap on inbound file size (Bot API caps downloads at 20 MB anyway).
const MAX_DOWNLOAD_BYTES: u32 = 20 * 1024 * 1024;

pub struct TelegramFiles {
    bot: Bot,
}

impl TelegramFiles {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl PlatformFiles for TelegramFiles {
    async fn download(&self, file_id: &str) -> Result<(Vec<u8>, String)> {
        let file = self.bot.get_file(teloxide::types::FileId(file_id.to_string())).await.map_err(|e| {
            warn!(file_id, error = %e, "get_file failed");
            QuillError::FileNotFound(format!("telegram file {file_id}: {e}"))
        })?;

        if file.size > MAX_DOWNLOAD_BYTES {
            return Err(QuillError::FileNotFound(format!(
                "telegram file {file_id} exceeds {MAX_DOWNLOAD_BYTES} bytes"
            )));
        }

        let mut buf: Vec<u8> = Vec::with_capacity(file.size as usize);
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| {
                warn!(file_id, error = %e, "download_file failed");
                QuillError::ExternalTransient {
                    service: "telegram".into(),
                    message: e.to_string(),
                }
            })?;

        // file.path looks like "photos/file_123.jpg" — keep the basename.
        let filename = file
            .path
            .rsplit('/')
            .next()
            .unwrap_or(file_id)
            .to_string();
        Ok((buf, filename))
    }
}
