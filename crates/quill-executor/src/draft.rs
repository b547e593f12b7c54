//! Seams to the platform's message surface.
//!
//! The executor never talks to the platform SDK directly; the adapter
//! implements these traits. `DraftSink` owns exactly one in-progress message
//! and applies the platform's edit-rate throttling internally.

use async_trait::async_trait;

use quill_core::Result;

/// A file produced by a tool, ready for delivery to the chat.
#[derive(Debug, Clone)]
pub struct DeliverableFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    /// Optional caption shown under the delivered file.
    pub caption: Option<String>,
}

impl DeliverableFile {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[async_trait]
pub trait DraftSink: Send + Sync {
    /// Replace the in-progress draft's visible content. Implementations
    /// throttle edits and skip no-op updates.
    async fn update(&self, display: &str) -> Result<()>;

    /// Finalize the current draft as a completed message part with the given
    /// final formatting, and start a fresh draft for subsequent updates.
    /// Returns the platform message id of the finalized part.
    async fn commit_part(&self, final_text: &str) -> Result<i64>;

    /// Deliver a file into the chat/topic the draft belongs to.
    /// Returns the platform message id of the sent file.
    async fn send_file(&self, file: &DeliverableFile) -> Result<i64>;

    /// Drop the current draft without committing (e.g. nothing streamed).
    async fn discard(&self) -> Result<()>;
}
