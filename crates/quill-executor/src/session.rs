//! Per-response streaming state machine.
//!
//! Consumes stream events, maintains the display blocks and the per-iteration
//! content blocks (the exact assistant content fed back to the API on the
//! next tool-loop iteration), and drives the draft through the sink.
//!
//! Splitting: when the text layer alone no longer fits the limit, the current
//! draft is committed as a finalized part (tool markers stripped) and a new
//! draft begins. Files force the same commit first so they appear after the
//! text that introduced them.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use quill_claude::{StreamEvent, ToolCall, Usage};
use quill_core::Result;

use crate::display::{BlockKind, DisplayManager, ParseMode};
use crate::draft::{DeliverableFile, DraftSink};
use crate::markdown::strip_tool_markers;
use crate::tools::registry::tool_emoji;
use crate::truncate::TruncationManager;

pub struct StreamingSession {
    sink: Arc<dyn DraftSink>,
    mode: ParseMode,
    display: DisplayManager,
    truncator: TruncationManager,
    last_sent: String,

    /// Tool calls collected this iteration, executed when the turn ends.
    pending_tools: Vec<ToolCall>,
    /// Raw assistant content blocks for the next API request.
    content_blocks: Vec<serde_json::Value>,
    /// Finalized message parts committed so far: (platform message id, text).
    committed_parts: Vec<(i64, String)>,
    /// Files delivered mid-stream: (platform message id, file).
    delivered_files: Vec<(i64, DeliverableFile)>,

    current_thinking: String,
    current_text: String,
    /// Full visible text of this iteration across splits.
    iteration_text: String,
    stop_reason: String,
    usage: Usage,
    model: String,
    thread_id: i64,
}

impl StreamingSession {
    pub fn new(sink: Arc<dyn DraftSink>, mode: ParseMode, thread_id: i64) -> Self {
        Self {
            sink,
            mode,
            display: DisplayManager::new(),
            truncator: TruncationManager::new(mode),
            last_sent: String::new(),
            pending_tools: Vec::new(),
            content_blocks: Vec::new(),
            committed_parts: Vec::new(),
            delivered_files: Vec::new(),
            current_thinking: String::new(),
            current_text: String::new(),
            iteration_text: String::new(),
            stop_reason: String::new(),
            usage: Usage::default(),
            model: String::new(),
            thread_id,
        }
    }

    pub fn pending_tools(&self) -> &[ToolCall] {
        &self.pending_tools
    }

    pub fn take_pending_tools(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending_tools)
    }

    pub fn stop_reason(&self) -> &str {
        &self.stop_reason
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Assistant content blocks of the finished iteration, for the tool loop.
    pub fn content_blocks(&self) -> &[serde_json::Value] {
        &self.content_blocks
    }

    /// Start the next tool-loop iteration. Display blocks persist — the user
    /// keeps seeing the accumulated draft; only per-iteration state resets.
    pub fn reset_iteration(&mut self) {
        self.pending_tools.clear();
        self.content_blocks.clear();
        self.current_thinking.clear();
        self.current_text.clear();
        self.stop_reason.clear();
    }

    pub async fn handle_event(&mut self, event: StreamEvent) -> Result<()> {
        match event {
            StreamEvent::ThinkingDelta { text } => self.on_thinking(&text).await,
            StreamEvent::TextDelta { text } => self.on_text(&text).await,
            StreamEvent::ToolUseStart { id, name } => self.on_tool_start(&id, &name).await,
            StreamEvent::ToolUseComplete { id, name, input } => {
                self.on_tool_complete(id, name, input);
                Ok(())
            }
            StreamEvent::MessageEnd {
                model,
                stop_reason,
                usage,
            } => {
                self.finalize_block();
                self.model = model;
                self.stop_reason = stop_reason;
                self.usage = usage;
                Ok(())
            }
            StreamEvent::Error { message } => Err(quill_core::QuillError::ExternalTransient {
                service: "anthropic_stream".into(),
                message,
            }),
        }
    }

    async fn on_thinking(&mut self, chunk: &str) -> Result<()> {
        let mut content = chunk.to_string();
        // Blank line after a tool marker/result so thinking doesn't glue to it.
        if self.current_thinking.is_empty() {
            if let Some(last) = self.display.last_thinking() {
                if last.trim_end().ends_with(']') {
                    content = format!("\n\n{}", content.trim_start_matches('\n'));
                }
            }
        }
        self.current_thinking.push_str(&content);
        self.display.append(BlockKind::Thinking, &content);
        self.update_draft().await
    }

    async fn on_text(&mut self, chunk: &str) -> Result<()> {
        let mut content = chunk.to_string();
        if self.current_text.is_empty() {
            if let Some(last) = self.display.last_thinking() {
                if last.trim_end().ends_with(']') {
                    content = format!("\n\n{}", content.trim_start_matches('\n'));
                }
            }
        }
        self.current_text.push_str(&content);
        self.iteration_text.push_str(&content);
        self.display.append(BlockKind::Text, &content);

        // Split when the visible text alone exceeds the platform limit.
        let (_, text_formatted) = self.display.format_layers(self.mode);
        if self.truncator.needs_split(&text_formatted) {
            info!(thread_id = self.thread_id, "message limit reached, splitting");
            self.commit_current_part().await?;
        }
        self.update_draft().await
    }

    async fn on_tool_start(&mut self, id: &str, name: &str) -> Result<()> {
        self.finalize_block();
        let emoji = tool_emoji(name);
        // generate_image's full marker waits for the prompt in the input.
        let marker = if name == "generate_image" {
            format!("\n\n[{emoji} {name}…]")
        } else {
            format!("\n\n[{emoji} {name}]")
        };
        self.display.append(BlockKind::Thinking, &marker);
        debug!(thread_id = self.thread_id, tool = name, tool_id = id, "tool marker shown");
        self.update_draft().await
    }

    fn on_tool_complete(&mut self, id: String, name: String, input: serde_json::Value) {
        self.finalize_block();
        // Rewrite the image-gen marker now that the prompt is known.
        if name == "generate_image" {
            if let Some(prompt) = input.get("prompt").and_then(|p| p.as_str()) {
                let emoji = tool_emoji(&name);
                let old = format!("[{emoji} {name}…]");
                let new = format!("[{emoji} {name}: \"{prompt}\"]");
                for block in self.display.blocks_mut() {
                    if block.kind == BlockKind::Thinking && block.content.contains(&old) {
                        block.content = block.content.replace(&old, &new);
                        break;
                    }
                }
            }
        }
        self.content_blocks.push(json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }));
        self.pending_tools.push(ToolCall { id, name, input });
    }

    /// Close the open thinking/text accumulation into a content block.
    fn finalize_block(&mut self) {
        if !self.current_thinking.is_empty() {
            // Thinking blocks from prior turns are not replayed to the API.
            self.current_thinking.clear();
        }
        if !self.current_text.is_empty() {
            self.content_blocks.push(json!({
                "type": "text",
                "text": std::mem::take(&mut self.current_text),
            }));
        }
    }

    /// Push the truncated draft through the sink, skipping no-op updates.
    async fn update_draft(&mut self) -> Result<()> {
        let (thinking, text) = self.display.format_layers(self.mode);
        let (thinking, text) = self.truncator.truncate_for_display(&thinking, &text);
        let combined = if thinking.is_empty() {
            text
        } else if text.is_empty() {
            thinking
        } else {
            format!("{thinking}\n{text}")
        };
        if combined.is_empty() || combined == self.last_sent {
            return Ok(());
        }
        self.last_sent = combined.clone();
        self.sink.update(&combined).await
    }

    /// Commit the visible text as a finalized part (thinking discarded, tool
    /// markers stripped) and open a fresh draft.
    pub async fn commit_current_part(&mut self) -> Result<()> {
        let text_raw = self.display.raw_layer(BlockKind::Text);
        let final_text = strip_tool_markers(&text_raw);
        if final_text.is_empty() {
            self.sink.discard().await?;
        } else {
            let message_id = self.sink.commit_part(&final_text).await?;
            self.committed_parts.push((message_id, final_text));
        }
        self.display.clear();
        self.last_sent.clear();
        Ok(())
    }

    /// Files arriving mid-stream: commit text first, then deliver.
    pub async fn deliver_files(&mut self, files: Vec<DeliverableFile>) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        self.commit_current_part().await?;
        for file in files {
            let message_id = self.sink.send_file(&file).await?;
            self.delivered_files.push((message_id, file));
        }
        Ok(())
    }

    /// Finalized parts: (platform message id, text), committed plus nothing —
    /// call after `finish()` so the live tail is included.
    pub fn final_parts(&self) -> &[(i64, String)] {
        &self.committed_parts
    }

    pub fn delivered_files(&self) -> &[(i64, DeliverableFile)] {
        &self.delivered_files
    }

    /// Commit whatever is still on screen at the end of the turn.
    pub async fn finish(&mut self) -> Result<()> {
        self.commit_current_part().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<String>>,
        committed: Mutex<Vec<String>>,
        files: Mutex<Vec<String>>,
        discards: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl DraftSink for RecordingSink {
        async fn update(&self, display: &str) -> Result<()> {
            self.updates.lock().unwrap().push(display.to_string());
            Ok(())
        }
        async fn commit_part(&self, final_text: &str) -> Result<i64> {
            let mut committed = self.committed.lock().unwrap();
            committed.push(final_text.to_string());
            Ok(committed.len() as i64)
        }
        async fn send_file(&self, file: &DeliverableFile) -> Result<i64> {
            let mut files = self.files.lock().unwrap();
            files.push(file.filename.clone());
            Ok(1000 + files.len() as i64)
        }
        async fn discard(&self) -> Result<()> {
            *self.discards.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn session() -> (StreamingSession, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let s = StreamingSession::new(Arc::clone(&sink) as Arc<dyn DraftSink>, ParseMode::Html, 1);
        (s, sink)
    }

    #[tokio::test]
    async fn text_deltas_accumulate_into_draft() {
        let (mut s, sink) = session();
        s.handle_event(StreamEvent::TextDelta { text: "Hello ".into() })
            .await
            .unwrap();
        s.handle_event(StreamEvent::TextDelta { text: "world".into() })
            .await
            .unwrap();
        let updates = sink.updates.lock().unwrap();
        assert_eq!(updates.last().unwrap(), "Hello world");
    }

    #[tokio::test]
    async fn duplicate_display_is_not_resent() {
        let (mut s, sink) = session();
        s.handle_event(StreamEvent::TextDelta { text: "same".into() })
            .await
            .unwrap();
        // thinking that renders to nothing visible does not re-send
        s.handle_event(StreamEvent::ThinkingDelta { text: "".into() })
            .await
            .unwrap();
        assert_eq!(sink.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tool_marker_appears_in_thinking_layer() {
        let (mut s, sink) = session();
        s.handle_event(StreamEvent::ToolUseStart {
            id: "tu_1".into(),
            name: "web_search".into(),
        })
        .await
        .unwrap();
        let updates = sink.updates.lock().unwrap();
        assert!(updates.last().unwrap().contains("web_search]"));
        assert!(updates.last().unwrap().starts_with("<blockquote expandable>"));
    }

    #[tokio::test]
    async fn image_gen_marker_is_rewritten_with_prompt() {
        let (mut s, sink) = session();
        s.handle_event(StreamEvent::ToolUseStart {
            id: "tu_1".into(),
            name: "generate_image".into(),
        })
        .await
        .unwrap();
        s.handle_event(StreamEvent::ToolUseComplete {
            id: "tu_1".into(),
            name: "generate_image".into(),
            input: json!({"prompt": "a cat"}),
        })
        .await
        .unwrap();
        s.handle_event(StreamEvent::TextDelta { text: "Here it comes".into() })
            .await
            .unwrap();
        let updates = sink.updates.lock().unwrap();
        assert!(
            updates.last().unwrap().contains("generate_image: \"a cat\"]"),
            "got: {}",
            updates.last().unwrap()
        );
    }

    #[tokio::test]
    async fn pending_tools_collected_for_dispatch() {
        let (mut s, _) = session();
        s.handle_event(StreamEvent::ToolUseComplete {
            id: "tu_1".into(),
            name: "web_search".into(),
            input: json!({"query": "rust"}),
        })
        .await
        .unwrap();
        assert_eq!(s.pending_tools().len(), 1);
        assert_eq!(s.content_blocks().len(), 1);
        assert_eq!(s.content_blocks()[0]["type"], "tool_use");
    }

    #[tokio::test]
    async fn file_delivery_commits_text_first() {
        let (mut s, sink) = session();
        s.handle_event(StreamEvent::TextDelta { text: "Generating…".into() })
            .await
            .unwrap();
        s.deliver_files(vec![DeliverableFile {
            filename: "cat.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![1],
            caption: None,
        }])
        .await
        .unwrap();

        assert_eq!(sink.committed.lock().unwrap().as_slice(), ["Generating…"]);
        assert_eq!(sink.files.lock().unwrap().as_slice(), ["cat.png"]);
        assert_eq!(s.delivered_files().len(), 1);
        // draft restarts clean
        s.handle_event(StreamEvent::TextDelta { text: "Done".into() })
            .await
            .unwrap();
        assert_eq!(sink.updates.lock().unwrap().last().unwrap(), "Done");
    }

    #[tokio::test]
    async fn long_text_splits_into_parts() {
        let (mut s, sink) = session();
        for _ in 0..6 {
            s.handle_event(StreamEvent::TextDelta {
                text: "words and more words. ".repeat(50),
            })
            .await
            .unwrap();
        }
        s.finish().await.unwrap();
        let committed = sink.committed.lock().unwrap();
        assert!(committed.len() >= 2, "expected split, got {}", committed.len());
        assert_eq!(s.final_parts().len(), committed.len());
    }

    #[tokio::test]
    async fn empty_turn_discards_draft() {
        let (mut s, sink) = session();
        s.finish().await.unwrap();
        assert_eq!(*sink.discards.lock().unwrap(), 1);
        assert!(sink.committed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_end_captures_stop_reason_and_usage() {
        let (mut s, _) = session();
        s.handle_event(StreamEvent::MessageEnd {
            model: "claude-sonnet-4-5".into(),
            stop_reason: "end_turn".into(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
        })
        .await
        .unwrap();
        assert_eq!(s.stop_reason(), "end_turn");
        assert_eq!(s.usage().output_tokens, 5);
        assert_eq!(s.model(), "claude-sonnet-4-5");
    }
}
