//! In-memory shapes that flow through the pipeline.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use quill_claude::Transcript;
use quill_store::types::FileKind;

/// Platform-agnostic snapshot of an inbound event, built by the adapter.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub meta: MessageMeta,
    /// Text or media caption; empty for bare media.
    pub text: String,
    pub content: InboundContent,
    /// Display name of the replied-to sender, with the replied snippet.
    pub reply: Option<(String, String)>,
    /// Human-readable forward origin ("Forwarded from …").
    pub forward_from: Option<String>,
    /// Quoted excerpt the user selected when replying.
    pub quote: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub chat_id: i64,
    pub user_id: i64,
    pub message_id: i64,
    pub topic_id: Option<i64>,
    pub media_group_id: Option<String>,
    pub is_private: bool,
    pub sender_display: String,
    pub language_code: Option<String>,
    /// The generation registered for this event's (chat, user, topic) tuple;
    /// a newer inbound message for the same tuple cancels it. The executor
    /// polls it at every suspension point.
    pub generation_token: CancellationToken,
}

/// The single media payload an event can carry.
#[derive(Debug, Clone)]
pub enum InboundContent {
    Text,
    Photo {
        file_id: String,
        unique_id: String,
    },
    Document {
        file_id: String,
        unique_id: String,
        filename: String,
        declared_mime: Option<String>,
    },
    Voice {
        file_id: String,
        unique_id: String,
        duration_secs: u32,
    },
    Audio {
        file_id: String,
        unique_id: String,
        filename: Option<String>,
        declared_mime: Option<String>,
    },
    Video {
        file_id: String,
        unique_id: String,
        filename: Option<String>,
        declared_mime: Option<String>,
    },
    VideoNote {
        file_id: String,
        unique_id: String,
        duration_secs: u32,
    },
}

impl InboundContent {
    /// Content-type label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            InboundContent::Text => "text",
            InboundContent::Photo { .. } => "photo",
            InboundContent::Document { .. } => "document",
            InboundContent::Voice { .. } => "voice",
            InboundContent::Audio { .. } => "audio",
            InboundContent::Video { .. } => "video",
            InboundContent::VideoNote { .. } => "video_note",
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, InboundContent::Text)
    }
}

/// A file that finished its files-API upload during normalization.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub mime_type: String,
    pub file_size: usize,
    pub kind: FileKind,
    pub claude_file_id: String,
    pub telegram_file_id: Option<String>,
    pub telegram_file_unique_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReplyContext {
    pub sender: String,
    pub snippet: String,
}

/// One inbound event after all I/O completed.
///
/// Invariant: once a ProcessedMessage is enqueued, every download, upload
/// and transcription it needed has already finished — the queue's flush
/// logic relies on this.
#[derive(Debug, Clone)]
pub struct ProcessedMessage {
    pub text: String,
    pub meta: MessageMeta,
    pub content_label: &'static str,
    pub files: Vec<UploadedFile>,
    pub transcript: Option<Transcript>,
    pub reply: Option<ReplyContext>,
    pub forward_from: Option<String>,
    pub quote: Option<String>,
    pub media_group_id: Option<String>,
    pub transcription_charged: bool,
    pub queued_at: Instant,
}

impl ProcessedMessage {
    pub fn has_media(&self) -> bool {
        self.content_label != "text"
    }

    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }

    pub fn has_transcript(&self) -> bool {
        self.transcript.is_some()
    }
}
