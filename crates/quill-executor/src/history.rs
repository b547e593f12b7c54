//! Request assembly: system prompt, multimodal history reconstruction, and
//! the user messages for the new batch.
//!
//! Context markers follow a tiered policy: a private chat message with no
//! reply/forward/quote context goes in as plain text; anything with context
//! gets the structured Markdown form so the model can tell voices apart.

use std::collections::HashMap;

use serde_json::{json, Value};

use quill_pipeline::model::ProcessedMessage;
use quill_store::types::{FileKind, MessageRow, Role, UserFile};

/// System-prompt section listing every file reachable from the thread.
/// Format is fixed — the model is prompted to reference these ids.
pub fn files_section(files: &[UserFile]) -> String {
    if files.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\n## Available files in this conversation\n");
    for f in files {
        let id = f.claude_file_id.as_deref().unwrap_or("(expired)");
        out.push_str(&format!(
            "- {} ({}, {}, {} bytes, id: {})\n",
            f.filename, f.file_kind, f.mime_type, f.file_size, id
        ));
    }
    out
}

/// global system prompt ⊕ user's custom prompt ⊕ files section.
pub fn system_prompt(global: &str, custom: Option<&str>, files: &[UserFile]) -> String {
    let mut prompt = global.to_string();
    if let Some(custom) = custom {
        if !custom.trim().is_empty() {
            prompt.push_str("\n\n## User instructions\n");
            prompt.push_str(custom.trim());
        }
    }
    prompt.push_str(&files_section(files));
    prompt
}

/// Reconstruct the thread's dialog as API messages. Files attach to the
/// message row that owns them as image/document blocks by claude_file_id.
pub fn build_history(
    rows: &[MessageRow],
    files_by_message: &HashMap<i64, Vec<UserFile>>,
    is_private: bool,
) -> Vec<Value> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let role = match row.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let text = format_row_text(row, is_private);
        let files = files_by_message.get(&row.id);

        let content = match files {
            Some(files) if !files.is_empty() => {
                let mut blocks: Vec<Value> = files
                    .iter()
                    .filter_map(|f| file_block(f))
                    .collect();
                if !text.is_empty() {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                if blocks.is_empty() {
                    continue;
                }
                json!(blocks)
            }
            _ => {
                if text.is_empty() {
                    continue;
                }
                json!(text)
            }
        };
        out.push(json!({ "role": role, "content": content }));
    }
    out
}

fn file_block(f: &UserFile) -> Option<Value> {
    let id = f.claude_file_id.as_deref()?;
    let block_type = match f.file_kind {
        FileKind::Image | FileKind::Generated => "image",
        FileKind::Pdf | FileKind::Document => "document",
        // audio/video have no native block; the files section lists them
        _ => return None,
    };
    Some(json!({
        "type": block_type,
        "source": { "type": "file", "file_id": id },
    }))
}

/// Textual form of a stored row, with context markers when present.
fn format_row_text(row: &MessageRow, is_private: bool) -> String {
    let body = row.text.clone().unwrap_or_default();
    let has_context = row.reply_snippet.is_some()
        || row.forward_origin.is_some()
        || row.quote_text.is_some();

    if is_private && !has_context {
        return body;
    }
    if !has_context {
        return body;
    }

    let mut out = String::new();
    if let Some(reply) = &row.reply_snippet {
        for line in reply.lines() {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
    }
    if let Some(quote) = &row.quote_text {
        out.push_str(&format!("> \"{quote}\"\n"));
    }
    if let Some(origin) = &row.forward_origin {
        out.push_str(&format!("[{origin}]\n"));
    }
    if !body.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&body);
    }
    out
}

/// The new batch, one user message per ProcessedMessage, arrival order.
pub fn batch_messages(batch: &[ProcessedMessage]) -> Vec<Value> {
    batch.iter().map(batch_message).collect()
}

fn batch_message(msg: &ProcessedMessage) -> Value {
    let mut text = String::new();

    if let Some(reply) = &msg.reply {
        text.push_str(&format!("> {} wrote: {}\n", reply.sender, reply.snippet));
    }
    if let Some(quote) = &msg.quote {
        text.push_str(&format!("> \"{quote}\"\n"));
    }
    if let Some(forward) = &msg.forward_from {
        text.push_str(&format!("[{forward}]\n"));
    }
    if !msg.meta.is_private {
        text.push_str(&format!("{}: ", msg.meta.sender_display));
    }
    text.push_str(&msg.text);

    if let Some(t) = &msg.transcript {
        if !text.trim().is_empty() {
            text.push('\n');
        }
        let lang = t.language.as_deref().unwrap_or("unknown");
        text.push_str(&format!(
            "[Voice transcript ({:.0}s, {lang})]: {}",
            t.duration_seconds, t.text
        ));
    }

    if msg.files.is_empty() {
        return json!({ "role": "user", "content": text });
    }

    let mut blocks: Vec<Value> = Vec::new();
    for f in &msg.files {
        let block_type = match f.kind {
            FileKind::Image | FileKind::Generated => Some("image"),
            FileKind::Pdf | FileKind::Document => Some("document"),
            _ => None,
        };
        if let Some(block_type) = block_type {
            blocks.push(json!({
                "type": block_type,
                "source": { "type": "file", "file_id": f.claude_file_id },
            }));
        } else {
            // audio/video: describable, not embeddable
            blocks.push(json!({
                "type": "text",
                "text": format!(
                    "[Attached {}: {} ({}), id: {}]",
                    f.kind, f.filename, f.mime_type, f.claude_file_id
                ),
            }));
        }
    }
    if !text.trim().is_empty() {
        blocks.push(json!({ "type": "text", "text": text }));
    }
    json!({ "role": "user", "content": blocks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_pipeline::model::{MessageMeta, ReplyContext};
    use quill_store::types::FileSource;
    use std::time::Instant;

    fn row(id: i64, role: Role, text: &str) -> MessageRow {
        MessageRow {
            id,
            thread_id: 1,
            chat_id: 1,
            message_id: id,
            role,
            text: Some(text.to_string()),
            forward_origin: None,
            reply_snippet: None,
            quote_text: None,
            edit_count: 0,
            thinking_tokens: None,
            text_tokens: None,
            created_at: String::new(),
        }
    }

    fn user_file(id: i64, message_id: i64, kind: FileKind) -> UserFile {
        UserFile {
            id,
            message_id,
            thread_id: 1,
            filename: "f.png".into(),
            mime_type: "image/png".into(),
            file_size: 10,
            file_kind: kind,
            source: FileSource::User,
            claude_file_id: Some(format!("file_{id}")),
            telegram_file_id: None,
            telegram_file_unique_id: None,
            uploaded_at: String::new(),
            expires_at: None,
        }
    }

    #[test]
    fn files_section_lists_every_file() {
        let files = vec![user_file(1, 1, FileKind::Image), user_file(2, 1, FileKind::Pdf)];
        let section = files_section(&files);
        assert!(section.contains("Available files"));
        assert!(section.contains("file_1"));
        assert!(section.contains("file_2"));
        assert!(files_section(&[]).is_empty());
    }

    #[test]
    fn system_prompt_appends_custom_and_files() {
        let prompt = system_prompt("Be helpful.", Some("Speak like a pirate"), &[]);
        assert!(prompt.starts_with("Be helpful."));
        assert!(prompt.contains("Speak like a pirate"));
    }

    #[test]
    fn plain_private_history_uses_string_content() {
        let rows = vec![row(1, Role::User, "hi"), row(2, Role::Assistant, "hello")];
        let history = build_history(&rows, &HashMap::new(), true);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["content"], "hi");
        assert_eq!(history[1]["role"], "assistant");
    }

    #[test]
    fn history_attaches_file_blocks() {
        let rows = vec![row(1, Role::User, "look at this")];
        let mut files = HashMap::new();
        files.insert(1, vec![user_file(5, 1, FileKind::Image)]);
        let history = build_history(&rows, &files, true);
        let content = history[0]["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["file_id"], "file_5");
        assert_eq!(content[1]["type"], "text");
    }

    #[test]
    fn reply_context_renders_blockquote() {
        let mut r = row(1, Role::User, "I disagree");
        r.reply_snippet = Some("the earth is flat".into());
        let history = build_history(&[r], &HashMap::new(), true);
        let text = history[0]["content"].as_str().unwrap();
        assert!(text.starts_with("> the earth is flat"));
        assert!(text.ends_with("I disagree"));
    }

    #[test]
    fn batch_message_includes_transcript_and_group_prefix() {
        let msg = ProcessedMessage {
            text: "what did I say?".into(),
            meta: MessageMeta {
                chat_id: 1,
                user_id: 2,
                message_id: 3,
                topic_id: None,
                media_group_id: None,
                is_private: false,
                sender_display: "Alice".into(),
                language_code: None,
                generation_token: Default::default(),
            },
            content_label: "voice",
            files: Vec::new(),
            transcript: Some(quill_claude::Transcript {
                text: "buy milk".into(),
                duration_seconds: 12.0,
                language: Some("en".into()),
                cost_usd: quill_core::Usd::ZERO,
            }),
            reply: Some(ReplyContext {
                sender: "Bob".into(),
                snippet: "reminder?".into(),
            }),
            forward_from: None,
            quote: None,
            media_group_id: None,
            transcription_charged: true,
            queued_at: Instant::now(),
        };
        let value = batch_message(&msg);
        let text = value["content"].as_str().unwrap();
        assert!(text.contains("> Bob wrote: reminder?"));
        assert!(text.contains("Alice: what did I say?"));
        assert!(text.contains("[Voice transcript (12s, en)]: buy milk"));
    }
}
