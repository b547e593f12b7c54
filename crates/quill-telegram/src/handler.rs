//! Unified ingestion handler for every content type.
//!
//! Flow per update: cancel any in-flight generation for the same
//! (chat, user, topic) tuple, register with the trackers, normalize (all
//! I/O), charge transcription, resolve the thread (with optional topic
//! routing), push to the queue, mark normalization finished, dispatch.
//!
//! Every failure path still marks the tracker finished — a leaked pending
//! entry would stall the batcher for the whole chat.

use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::{MessageId, ThreadId};
use tracing::{error, info, warn};
use uuid::Uuid;

use quill_core::{metrics, QuillError};
use quill_pipeline::model::{InboundContent, InboundMessage, MessageMeta};
use quill_pipeline::{BatchProcessor, PushOutcome, RouteDecision};
use quill_store::threads;

use crate::context::AppContext;
use crate::draft::TelegramDraft;
use crate::typing::TypingHandle;

/// Batch processor wired to the executor: one Telegram draft per batch.
///
/// Holds a Weak reference — the context owns the queue which owns this
/// processor, so a strong reference would leak the whole graph.
pub struct TelegramBatchProcessor {
    pub ctx_weak: std::sync::Weak<AppContext>,
}

#[async_trait::async_trait]
impl BatchProcessor for TelegramBatchProcessor {
    async fn process(
        &self,
        thread_id: i64,
        batch: Vec<quill_pipeline::model::ProcessedMessage>,
    ) -> quill_core::Result<()> {
        let Some(ctx) = self.ctx_weak.upgrade() else {
            return Ok(()); // shutting down
        };
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let chat_id = ChatId(first.meta.chat_id);
        let topic_id = first.meta.topic_id.map(|t| ThreadId(MessageId(t as i32)));

        // The newest message's token is the live one — earlier tokens in the
        // batch were cancelled by the later `begin` calls.
        let token = batch
            .last()
            .map(|m| m.meta.generation_token.clone())
            .unwrap_or_default();

        let typing = TypingHandle::start(ctx.bot.clone(), chat_id);
        let sink = TelegramDraft::new(
            ctx.bot.clone(),
            chat_id,
            topic_id,
            ctx.tg_parse_mode(),
        );

        let result = ctx
            .executor
            .run(thread_id, batch.clone(), sink, token.clone())
            .await;
        typing.stop();

        ctx.generation_tracker.finish(
            first.meta.chat_id,
            first.meta.user_id,
            first.meta.topic_id,
            &token,
        );

        match result {
            Ok(()) => Ok(()),
            Err(QuillError::ConcurrencyLimitExceeded { queue_position, .. }) => {
                let _ = ctx
                    .bot
                    .send_message(
                        chat_id,
                        format!(
                            "You have too many requests in flight (queue position {queue_position}). \
                             Please wait for one to finish."
                        ),
                    )
                    .await;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Main message handler registered in the teloxide Dispatcher.
pub async fn handle_message(bot: Bot, msg: Message, ctx: Arc<AppContext>) -> ResponseResult<()> {
    // Ignore other bots and anonymous channel posts.
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }

    let user_id = from.id.0 as i64;
    let chat_id = msg.chat.id.0;
    let message_id = msg.id.0 as i64;
    let topic_id = msg.thread_id.map(|t| t.0 .0 as i64);
    let request_id = Uuid::new_v4();

    let Some(mut inbound) = build_inbound(&msg) else {
        return Ok(()); // unsupported content (stickers, polls, …)
    };
    let content_type = inbound.content.label();

    // New question supersedes the in-flight answer for this tuple.
    if ctx.generation_tracker.is_active(chat_id, user_id, topic_id) {
        ctx.generation_tracker.cancel(chat_id, user_id, topic_id);
        info!(%request_id, user_id, chat_id, "cancelled active generation");
    }
    // Register this event's generation; the token rides with the message so
    // the batch processor ends up holding the same one the registry does.
    let generation_token = ctx.generation_tracker.begin(chat_id, user_id, topic_id);
    inbound.meta.generation_token = generation_token.clone();

    metrics::record_message_received();
    info!(%request_id, user_id, chat_id, message_id, content_type, "update received");

    ctx.normalization_tracker.start(chat_id, message_id).await;
    if let Some(group_id) = &inbound.meta.media_group_id {
        ctx.media_group_tracker.register(group_id).await;
    }

    if let Err(e) = ingest(&bot, &ctx, inbound, user_id).await {
        metrics::record_error();
        error!(
            %request_id,
            user_id,
            chat_id,
            message_id,
            content_type,
            error = %e,
            code = e.code(),
            "ingestion failed"
        );
        let _ = bot.send_message(msg.chat.id, error_message(content_type)).await;
        // Always unblock the batcher and retire the registered generation.
        ctx.normalization_tracker.finish(chat_id, message_id).await;
        ctx.generation_tracker
            .finish(chat_id, user_id, topic_id, &generation_token);
    }

    Ok(())
}

/// Normalize → charge transcription → resolve thread → route → enqueue.
async fn ingest(
    bot: &Bot,
    ctx: &Arc<AppContext>,
    inbound: InboundMessage,
    user_id: i64,
) -> quill_core::Result<()> {
    let chat_id = inbound.meta.chat_id;
    let message_id = inbound.meta.message_id;
    let media_group_id = inbound.meta.media_group_id.clone();

    // Ensure the user row exists before anything can bill them.
    let default_model = ctx.config.claude.model.clone();
    let from_username = inbound.meta.sender_display.clone();
    let language = inbound.meta.language_code.clone();
    ctx.store.with_conn(|conn| {
        quill_store::users::get_or_create(
            conn,
            user_id,
            None,
            Some(&from_username),
            language.as_deref(),
            &default_model,
        )
    })?;

    let mut processed = ctx.normalizer.normalize(inbound).await?;

    // Transcription is billed at ingestion, exactly once.
    if let Some(t) = &processed.transcript {
        if !processed.transcription_charged && t.cost_usd.is_positive() {
            let description = format!("Voice transcription ({:.0}s)", t.duration_seconds);
            ctx.ledger
                .charge(user_id, t.cost_usd, &description, Some(message_id))?;
            processed.transcription_charged = true;
        }
    }

    // Resolve thread (cache-first), with optional topic routing.
    let topic_id = processed.meta.topic_id;
    let thread_key = quill_cache::thread_key(chat_id, user_id, topic_id.unwrap_or(0));
    let mut thread = match ctx.thread_cache.get(&thread_key) {
        Some(t) => t,
        None => {
            let t = ctx.store.with_conn(|conn| {
                threads::get_or_create(conn, chat_id, user_id, topic_id, None)
            })?;
            ctx.thread_cache
                .insert(thread_key, t.clone(), quill_cache::THREAD_TTL);
            t
        }
    };

    if ctx.router.enabled() && processed.content_label == "text" {
        match ctx.router.route(&thread, &processed.text).await? {
            RouteDecision::Stay => {}
            RouteDecision::Resume {
                thread_id,
                topic_id: target_topic,
                title,
            } => {
                // Redirect notice in the old topic, then move the message.
                let _ = crate::send::send_chunked(
                    bot,
                    ChatId(chat_id),
                    processed
                        .meta
                        .topic_id
                        .map(|t| ThreadId(MessageId(t as i32))),
                    &format!("↗ {title}"),
                )
                .await;
                processed.meta.topic_id = Some(target_topic);
                thread = ctx
                    .store
                    .with_conn(|conn| threads::get_by_id(conn, thread_id))?
                    .ok_or(QuillError::ThreadNotFound { id: thread_id })?;
            }
            RouteDecision::New { title } => {
                match bot.create_forum_topic(ChatId(chat_id), &title).await {
                    Ok(topic) => {
                        let new_topic_id = topic.thread_id.0 .0 as i64;
                        processed.meta.topic_id = Some(new_topic_id);
                        thread = ctx.store.with_conn(|conn| {
                            threads::get_or_create(
                                conn,
                                chat_id,
                                user_id,
                                Some(new_topic_id),
                                Some(&title),
                            )
                        })?;
                    }
                    Err(e) => {
                        warn!(error = %e, "create_forum_topic failed, staying in place");
                    }
                }
            }
        }
    }

    // Routing may have moved the message to another tuple; re-home the
    // generation entry so cancel/finish keep working against the registry.
    if processed.meta.topic_id != topic_id {
        ctx.generation_tracker
            .finish(chat_id, user_id, topic_id, &processed.meta.generation_token);
        processed.meta.generation_token =
            ctx.generation_tracker
                .begin(chat_id, user_id, processed.meta.topic_id);
    }

    // Queue ordering contract: push, then finish, then dispatch.
    let outcome = ctx.queue.push(thread.id, processed).await;
    ctx.normalization_tracker.finish(chat_id, message_id).await;
    if outcome == PushOutcome::ShouldDispatch {
        ctx.queue
            .dispatch(thread.id, chat_id, media_group_id.as_deref())
            .await;
    }
    Ok(())
}

/// Build the platform-agnostic snapshot the pipeline works with.
pub fn build_inbound(msg: &Message) -> Option<InboundMessage> {
    let from = msg.from.as_ref()?;
    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();

    let content = if let Some(photos) = msg.photo() {
        // Highest resolution is last.
        let photo = photos.last()?;
        InboundContent::Photo {
            file_id: photo.file.id.to_string(),
            unique_id: photo.file.unique_id.to_string(),
        }
    } else if let Some(doc) = msg.document() {
        InboundContent::Document {
            file_id: doc.file.id.to_string(),
            unique_id: doc.file.unique_id.to_string(),
            filename: doc
                .file_name
                .clone()
                .unwrap_or_else(|| "document".to_string()),
            declared_mime: doc.mime_type.as_ref().map(|m| m.to_string()),
        }
    } else if let Some(voice) = msg.voice() {
        InboundContent::Voice {
            file_id: voice.file.id.to_string(),
            unique_id: voice.file.unique_id.to_string(),
            duration_secs: voice.duration.seconds(),
        }
    } else if let Some(audio) = msg.audio() {
        InboundContent::Audio {
            file_id: audio.file.id.to_string(),
            unique_id: audio.file.unique_id.to_string(),
            filename: audio.file_name.clone(),
            declared_mime: audio.mime_type.as_ref().map(|m| m.to_string()),
        }
    } else if let Some(video) = msg.video() {
        InboundContent::Video {
            file_id: video.file.id.to_string(),
            unique_id: video.file.unique_id.to_string(),
            filename: video.file_name.clone(),
            declared_mime: video.mime_type.as_ref().map(|m| m.to_string()),
        }
    } else if let Some(note) = msg.video_note() {
        InboundContent::VideoNote {
            file_id: note.file.id.to_string(),
            unique_id: note.file.unique_id.to_string(),
            duration_secs: note.duration.seconds(),
        }
    } else if !text.is_empty() {
        InboundContent::Text
    } else {
        return None;
    };

    // Reply context: sender display + a snippet of the replied message.
    let reply = msg.reply_to_message().map(|replied| {
        let sender = replied
            .from
            .as_ref()
            .map(|u| u.full_name())
            .unwrap_or_else(|| "someone".to_string());
        let snippet: String = replied
            .text()
            .or(replied.caption())
            .unwrap_or("[media]")
            .chars()
            .take(200)
            .collect();
        (sender, snippet)
    });

    let forward_from = msg.forward_origin().map(|origin| {
        use teloxide::types::MessageOrigin;
        match origin {
            MessageOrigin::User { sender_user, .. } => {
                format!("Forwarded from {}", sender_user.full_name())
            }
            MessageOrigin::HiddenUser {
                sender_user_name, ..
            } => format!("Forwarded from {sender_user_name}"),
            MessageOrigin::Chat { sender_chat, .. } => format!(
                "Forwarded from {}",
                sender_chat.title().unwrap_or("a chat")
            ),
            MessageOrigin::Channel { chat, .. } => {
                format!("Forwarded from {}", chat.title().unwrap_or("a channel"))
            }
        }
    });

    let quote = msg.quote().map(|q| q.text.clone());

    Some(InboundMessage {
        meta: MessageMeta {
            chat_id: msg.chat.id.0,
            user_id: from.id.0 as i64,
            message_id: msg.id.0 as i64,
            topic_id: msg.thread_id.map(|t| t.0 .0 as i64),
            media_group_id: msg.media_group_id().map(|s| s.to_string()),
            is_private: msg.chat.is_private(),
            sender_display: from.full_name(),
            language_code: from.language_code.clone(),
            // replaced by the tracker's token once the handler registers it
            generation_token: Default::default(),
        },
        text,
        content,
        reply,
        forward_from,
        quote,
    })
}

fn error_message(content_type: &str) -> &'static str {
    match content_type {
        "voice" => "Failed to process voice message. Please try again.",
        "video_note" => "Failed to process video note. Please try again.",
        "audio" => "Failed to process audio file. Please try again later.",
        "video" => "Failed to process video file. Please try again later.",
        "photo" => "Failed to upload photo. Please try again later.",
        "document" => "Failed to upload document. Please try again later.",
        _ => "Failed to process message. Please try again.",
    }
}
