//! The platform side of streaming: one in-progress draft message, edited in
//! place as deltas arrive, finalized into parts.
//!
//! Telegram tolerates roughly one edit per second per chat; the manager
//! enforces a minimum interval between edits and always applies the latest
//! pending content at the next opportunity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId, ParseMode as TgParseMode, ThreadId};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use quill_core::{QuillError, Result};
use quill_executor::draft::{DeliverableFile, DraftSink};
use quill_executor::markdown::escape_markdown_v2;

use crate::send::send_chunked;

/// Minimum interval between draft edits.
const EDIT_INTERVAL: Duration = Duration::from_millis(1200);

struct DraftState {
    message_id: Option<MessageId>,
    last_edit: Instant,
    last_text: String,
}

pub struct TelegramDraft {
    bot: Bot,
    chat_id: ChatId,
    topic_id: Option<ThreadId>,
    parse_mode: TgParseMode,
    state: Mutex<DraftState>,
}

impl TelegramDraft {
    pub fn new(
        bot: Bot,
        chat_id: ChatId,
        topic_id: Option<ThreadId>,
        parse_mode: TgParseMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            bot,
            chat_id,
            topic_id,
            parse_mode,
            state: Mutex::new(DraftState {
                message_id: None,
                last_edit: Instant::now() - EDIT_INTERVAL,
                last_text: String::new(),
            }),
        })
    }

    async fn send_new(&self, text: &str) -> Result<MessageId> {
        let mut request = self
            .bot
            .send_message(self.chat_id, text)
            .parse_mode(self.parse_mode);
        if let Some(topic) = self.topic_id {
            request = request.message_thread_id(topic);
        }
        let sent = request.await.map_err(to_quill)?;
        Ok(sent.id)
    }
}

fn to_quill(e: teloxide::RequestError) -> QuillError {
    QuillError::ExternalTransient {
        service: "telegram".into(),
        message: e.to_string(),
    }
}

#[async_trait]
impl DraftSink for TelegramDraft {
    async fn update(&self, display: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if display == state.last_text {
            return Ok(());
        }
        if state.last_edit.elapsed() < EDIT_INTERVAL && state.message_id.is_some() {
            // Too soon — this update is superseded by a later one anyway.
            return Ok(());
        }

        match state.message_id {
            None => {
                let id = self.send_new(display).await?;
                state.message_id = Some(id);
            }
            Some(id) => {
                let edit = self
                    .bot
                    .edit_message_text(self.chat_id, id, display)
                    .parse_mode(self.parse_mode)
                    .await;
                if let Err(e) = edit {
                    // Formatting mid-stream can be transiently invalid; the
                    // next delta will repair it.
                    debug!(error = %e, "draft edit rejected, will retry on next delta");
                    return Ok(());
                }
            }
        }
        state.last_edit = Instant::now();
        state.last_text = display.to_string();
        Ok(())
    }

    async fn commit_part(&self, final_text: &str) -> Result<i64> {
        let mut state = self.state.lock().await;
        let escaped = escape_markdown_v2(final_text);

        let committed_id = match state.message_id.take() {
            Some(id) if escaped.len() <= crate::send::PART_LIMIT => {
                let edit = self
                    .bot
                    .edit_message_text(self.chat_id, id, &escaped)
                    .parse_mode(self.parse_mode)
                    .await;
                if edit.is_err() {
                    // Final formatting rejected — replace with plain text.
                    let _ = self
                        .bot
                        .edit_message_text(self.chat_id, id, final_text)
                        .await;
                }
                id
            }
            existing => {
                // No draft, or the final text outgrew one message: delete the
                // draft and send fresh chunks.
                if let Some(id) = existing {
                    let _ = self.bot.delete_message(self.chat_id, id).await;
                }
                send_chunked(&self.bot, self.chat_id, self.topic_id, final_text)
                    .await
                    .ok_or_else(|| QuillError::ExternalTransient {
                        service: "telegram".into(),
                        message: "failed to send finalized part".into(),
                    })?
            }
        };

        state.last_text.clear();
        state.last_edit = Instant::now() - EDIT_INTERVAL;
        Ok(committed_id.0 as i64)
    }

    async fn send_file(&self, file: &DeliverableFile) -> Result<i64> {
        let input = InputFile::memory(file.bytes.clone()).file_name(file.filename.clone());
        let sent = if file.is_image() {
            let mut request = self.bot.send_photo(self.chat_id, input);
            if let Some(topic) = self.topic_id {
                request = request.message_thread_id(topic);
            }
            if let Some(caption) = &file.caption {
                request = request.caption(caption.clone());
            }
            request.await.map_err(to_quill)?
        } else {
            let mut request = self.bot.send_document(self.chat_id, input);
            if let Some(topic) = self.topic_id {
                request = request.message_thread_id(topic);
            }
            if let Some(caption) = &file.caption {
                request = request.caption(caption.clone());
            }
            request.await.map_err(to_quill)?
        };
        Ok(sent.id.0 as i64)
    }

    async fn discard(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(id) = state.message_id.take() {
            if let Err(e) = self.bot.delete_message(self.chat_id, id).await {
                warn!(error = %e, "draft delete failed");
            }
        }
        state.last_text.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Network-dependent behavior is covered by the executor's sink tests
    // against a recording sink; here only the split helper contract matters.
    use crate::send::{split_message, PART_LIMIT};

    #[test]
    fn part_limit_under_platform_limit() {
        assert!(PART_LIMIT < 4096);
        let parts = split_message(&"a".repeat(10_000));
        assert!(parts.iter().all(|p| p.len() <= PART_LIMIT));
    }
}
