//! Inbound-event normalization: every download, upload and transcription an
//! event needs happens here, before the message is allowed near the queue.
//!
//! Exactly one ProcessedMessage per event. Media bytes are pulled from the
//! platform, MIME is sniffed from content, images/documents/audio/video are
//! uploaded to the LLM files API (with a dedup shortcut when the platform's
//! stable unique id was seen before), and voice/video-notes are transcribed.
//! Audio and video files are uploaded but NOT auto-transcribed — the user can
//! invoke the transcription tool explicitly.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use quill_claude::{FilesClient, SpeechClient};
use quill_core::{QuillError, Result};
use quill_files::kind::classify;
use quill_files::PlatformFiles;
use quill_store::types::FileKind;
use quill_store::{files as file_repo, Store};

use crate::model::{
    InboundContent, InboundMessage, ProcessedMessage, ReplyContext, UploadedFile,
};

pub struct Normalizer {
    platform: Arc<dyn PlatformFiles>,
    files_api: FilesClient,
    speech: SpeechClient,
    store: Arc<Store>,
}

impl Normalizer {
    pub fn new(
        platform: Arc<dyn PlatformFiles>,
        files_api: FilesClient,
        speech: SpeechClient,
        store: Arc<Store>,
    ) -> Self {
        Self {
            platform,
            files_api,
            speech,
            store,
        }
    }

    /// Turn one inbound event into a ProcessedMessage. All I/O completes
    /// before this returns — the queue relies on that invariant.
    pub async fn normalize(&self, inbound: InboundMessage) -> Result<ProcessedMessage> {
        let started = Instant::now();
        let content_label = inbound.content.label();
        let mut files = Vec::new();
        let mut transcript = None;

        match &inbound.content {
            InboundContent::Text => {}

            InboundContent::Photo { file_id, unique_id } => {
                let uploaded = self
                    .upload_media(file_id, unique_id, None, None, Some(FileKind::Image))
                    .await?;
                files.push(uploaded);
            }

            InboundContent::Document {
                file_id,
                unique_id,
                filename,
                declared_mime,
            } => {
                let uploaded = self
                    .upload_media(
                        file_id,
                        unique_id,
                        Some(filename.as_str()),
                        declared_mime.as_deref(),
                        None,
                    )
                    .await?;
                files.push(uploaded);
            }

            InboundContent::Voice {
                file_id,
                duration_secs,
                ..
            } => {
                let (bytes, name) = self.platform.download(file_id).await?;
                debug!(file_id, duration_secs, "transcribing voice message");
                let t = self
                    .speech
                    .transcribe(&name, "audio/ogg", bytes)
                    .await
                    .map_err(|e| external(e, "speech"))?;
                transcript = Some(t);
            }

            InboundContent::VideoNote { file_id, .. } => {
                let (bytes, name) = self.platform.download(file_id).await?;
                debug!(file_id, "transcribing video note");
                let t = self
                    .speech
                    .transcribe(&name, "video/mp4", bytes)
                    .await
                    .map_err(|e| external(e, "speech"))?;
                transcript = Some(t);
            }

            InboundContent::Audio {
                file_id,
                unique_id,
                filename,
                declared_mime,
            } => {
                let uploaded = self
                    .upload_media(
                        file_id,
                        unique_id,
                        filename.as_deref(),
                        declared_mime.as_deref(),
                        Some(FileKind::Audio),
                    )
                    .await?;
                files.push(uploaded);
            }

            InboundContent::Video {
                file_id,
                unique_id,
                filename,
                declared_mime,
            } => {
                let uploaded = self
                    .upload_media(
                        file_id,
                        unique_id,
                        filename.as_deref(),
                        declared_mime.as_deref(),
                        Some(FileKind::Video),
                    )
                    .await?;
                files.push(uploaded);
            }
        }

        let processed = ProcessedMessage {
            text: inbound.text,
            content_label,
            files,
            transcript,
            reply: inbound.reply.map(|(sender, snippet)| ReplyContext { sender, snippet }),
            forward_from: inbound.forward_from,
            quote: inbound.quote,
            media_group_id: inbound.meta.media_group_id.clone(),
            meta: inbound.meta,
            transcription_charged: false,
            queued_at: Instant::now(),
        };

        info!(
            chat_id = processed.meta.chat_id,
            message_id = processed.meta.message_id,
            content = content_label,
            has_files = processed.has_files(),
            has_transcript = processed.has_transcript(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "message normalized"
        );
        Ok(processed)
    }

    /// Download + classify + upload one media payload, reusing a previous
    /// upload when the platform's stable unique id matches a fresh record.
    async fn upload_media(
        &self,
        file_id: &str,
        unique_id: &str,
        filename: Option<&str>,
        declared_mime: Option<&str>,
        hint: Option<FileKind>,
    ) -> Result<UploadedFile> {
        if let Some(existing) = self.fresh_duplicate(unique_id)? {
            info!(unique_id, claude_file_id = %existing.claude_file_id, "file dedup hit");
            return Ok(existing);
        }

        let (bytes, downloaded_name) = self.platform.download(file_id).await?;
        let name = filename.unwrap_or(&downloaded_name).to_string();
        let (kind, mime) = classify(&bytes, &name, declared_mime, hint);
        // PDFs ride in as documents; the byte-level classifier refines them.
        let kind = match (kind, mime.as_str()) {
            (FileKind::Document, "application/pdf") => FileKind::Pdf,
            (k, _) => k,
        };

        let size = bytes.len();
        let handle = self
            .files_api
            .upload(&name, &mime, bytes)
            .await
            .map_err(|e| external(e, "files_api"))?;

        Ok(UploadedFile {
            filename: name,
            mime_type: mime,
            file_size: size,
            kind,
            claude_file_id: handle.id,
            telegram_file_id: Some(file_id.to_string()),
            telegram_file_unique_id: Some(unique_id.to_string()),
        })
    }

    /// A previous upload with the same unique id whose LLM-side handle has
    /// not expired yet.
    fn fresh_duplicate(&self, unique_id: &str) -> Result<Option<UploadedFile>> {
        let row = self
            .store
            .with_conn(|conn| file_repo::get_by_telegram_unique_id(conn, unique_id))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let Some(claude_file_id) = row.claude_file_id else {
            return Ok(None);
        };
        if let Some(expires_at) = &row.expires_at {
            let expired = chrono::DateTime::parse_from_rfc3339(expires_at)
                .map(|dt| dt < chrono::Utc::now())
                .unwrap_or(true);
            if expired {
                return Ok(None);
            }
        }
        Ok(Some(UploadedFile {
            filename: row.filename,
            mime_type: row.mime_type,
            file_size: row.file_size as usize,
            kind: row.file_kind,
            claude_file_id,
            telegram_file_id: row.telegram_file_id,
            telegram_file_unique_id: row.telegram_file_unique_id,
        }))
    }
}

fn external(e: quill_claude::ClaudeError, service: &str) -> QuillError {
    match &e {
        quill_claude::ClaudeError::Api { status, message } if *status < 500 && *status != 429 => {
            QuillError::ExternalPermanent {
                service: service.to_string(),
                message: message.clone(),
            }
        }
        _ => QuillError::ExternalTransient {
            service: service.to_string(),
            message: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageMeta;
    use async_trait::async_trait;

    struct StaticPlatform;

    #[async_trait]
    impl PlatformFiles for StaticPlatform {
        async fn download(&self, file_id: &str) -> Result<(Vec<u8>, String)> {
            // PNG magic so classification resolves to image/png
            Ok((
                vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
                format!("{file_id}.png"),
            ))
        }
    }

    fn meta() -> MessageMeta {
        MessageMeta {
            chat_id: 1,
            user_id: 2,
            message_id: 3,
            topic_id: None,
            media_group_id: None,
            is_private: true,
            sender_display: "Alice".into(),
            language_code: Some("en".into()),
            generation_token: Default::default(),
        }
    }

    fn normalizer() -> Normalizer {
        use quill_core::retry::RetryPolicy;
        let retry = RetryPolicy::new(1, 0.001, 0.002);
        Normalizer::new(
            Arc::new(StaticPlatform),
            FilesClient::new("k".into(), Some("http://127.0.0.1:1".into()), retry),
            SpeechClient::new("http://127.0.0.1:1".into(), "k".into(), retry),
            Arc::new(Store::open_in_memory().unwrap()),
        )
    }

    #[tokio::test]
    async fn text_message_normalizes_without_io() {
        let n = normalizer();
        let processed = n
            .normalize(InboundMessage {
                meta: meta(),
                text: "hello".into(),
                content: InboundContent::Text,
                reply: Some(("Bob".into(), "earlier message".into())),
                forward_from: None,
                quote: None,
            })
            .await
            .unwrap();

        assert_eq!(processed.text, "hello");
        assert!(!processed.has_media());
        assert!(!processed.has_files());
        assert!(!processed.has_transcript());
        let reply = processed.reply.unwrap();
        assert_eq!(reply.sender, "Bob");
    }

    #[tokio::test]
    async fn photo_upload_failure_surfaces_as_transient() {
        // files API endpoint is unreachable — the error must be the
        // retried-and-exhausted transient kind, not a panic or silent skip.
        let n = normalizer();
        let err = n
            .normalize(InboundMessage {
                meta: meta(),
                text: String::new(),
                content: InboundContent::Photo {
                    file_id: "ph1".into(),
                    unique_id: "u1".into(),
                },
                reply: None,
                forward_from: None,
                quote: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QuillError::ExternalTransient { .. }));
    }

    #[tokio::test]
    async fn flags_are_consistent_with_content() {
        let n = normalizer();
        let processed = n
            .normalize(InboundMessage {
                meta: meta(),
                text: "caption".into(),
                content: InboundContent::Text,
                reply: None,
                forward_from: Some("Forwarded from Carol".into()),
                quote: Some("the quoted bit".into()),
            })
            .await
            .unwrap();
        assert_eq!(processed.forward_from.as_deref(), Some("Forwarded from Carol"));
        assert_eq!(processed.quote.as_deref(), Some("the quoted bit"));
    }
}
