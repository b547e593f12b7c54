//! SSE parsing for the Messages streaming API.
//!
//! Reads a reqwest byte stream, splits SSE lines, and emits `StreamEvent`s.
//! Tool input JSON arrives as `input_json_delta` fragments and is only
//! parseable once the content block closes.

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::{StreamEvent, Usage};

/// Parse a single SSE line: `event: <type>` or `data: <json>`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Accumulated per-stream parser state.
#[derive(Default)]
struct StreamState {
    current_event: String,
    current_block_type: String,
    tool_use_id: String,
    tool_use_name: String,
    tool_use_input_json: String,
    model: String,
    usage: Usage,
    stop_reason: String,
}

/// Consume the HTTP response as SSE and forward events to `tx`.
/// Returns when the stream ends or the receiver is dropped.
pub async fn process_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    use futures_util::StreamExt;

    let mut state = StreamState::default();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(parsed) = parse_sse_line(line) {
                match parsed {
                    SseParsed::Event(ev) => state.current_event = ev,
                    SseParsed::Data(data) => {
                        for event in parse_data_block(&mut state, &data) {
                            if tx.send(event).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx
        .send(StreamEvent::MessageEnd {
            model: std::mem::take(&mut state.model),
            stop_reason: std::mem::take(&mut state.stop_reason),
            usage: state.usage,
        })
        .await;
}

/// Parse one SSE data block. May yield zero, one, or (for tool blocks) two events.
fn parse_data_block(state: &mut StreamState, data: &str) -> Vec<StreamEvent> {
    match state.current_event.as_str() {
        "message_start" => {
            if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                state.model = msg.message.model;
                state.usage.input_tokens = msg.message.usage.input_tokens;
                state.usage.cache_read_input_tokens =
                    msg.message.usage.cache_read_input_tokens.unwrap_or(0);
                state.usage.cache_creation_input_tokens =
                    msg.message.usage.cache_creation_input_tokens.unwrap_or(0);
            }
            Vec::new()
        }

        "content_block_start" => {
            let Ok(block_start) = serde_json::from_str::<ContentBlockStart>(data) else {
                return Vec::new();
            };
            state.current_block_type = block_start.content_block.block_type.clone();
            if block_start.content_block.block_type == "tool_use" {
                state.tool_use_id = block_start.content_block.id.unwrap_or_default();
                state.tool_use_name = block_start.content_block.name.unwrap_or_default();
                state.tool_use_input_json.clear();
                return vec![StreamEvent::ToolUseStart {
                    id: state.tool_use_id.clone(),
                    name: state.tool_use_name.clone(),
                }];
            }
            Vec::new()
        }

        "content_block_delta" => {
            let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) else {
                return Vec::new();
            };
            match delta.delta.delta_type.as_str() {
                "text_delta" => delta
                    .delta
                    .text
                    .map(|text| vec![StreamEvent::TextDelta { text }])
                    .unwrap_or_default(),
                "thinking_delta" => delta
                    .delta
                    .thinking
                    .map(|text| vec![StreamEvent::ThinkingDelta { text }])
                    .unwrap_or_default(),
                "input_json_delta" => {
                    if let Some(partial) = delta.delta.partial_json {
                        state.tool_use_input_json.push_str(&partial);
                    }
                    Vec::new()
                }
                other => {
                    debug!(delta_type = other, "unhandled delta type");
                    Vec::new()
                }
            }
        }

        "content_block_stop" => {
            if state.current_block_type == "tool_use" {
                let input =
                    serde_json::from_str::<serde_json::Value>(&state.tool_use_input_json)
                        .unwrap_or(serde_json::Value::Object(Default::default()));
                state.tool_use_input_json.clear();
                state.current_block_type.clear();
                return vec![StreamEvent::ToolUseComplete {
                    id: std::mem::take(&mut state.tool_use_id),
                    name: std::mem::take(&mut state.tool_use_name),
                    input,
                }];
            }
            state.current_block_type.clear();
            Vec::new()
        }

        "message_delta" => {
            if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                state.usage.output_tokens = delta.usage.output_tokens;
                if let Some(reason) = delta.delta.stop_reason {
                    state.stop_reason = reason;
                }
            }
            Vec::new()
        }

        "error" => {
            warn!(data, "stream error event");
            vec![StreamEvent::Error {
                message: data.to_string(),
            }]
        }

        // message_stop, ping, unknown events — no action needed
        _ => Vec::new(),
    }
}

// SSE data payloads (deserialization only)

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    /// Populated for `tool_use` blocks.
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    thinking: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaInner,
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_parsing() {
        assert!(matches!(
            parse_sse_line("event: message_start"),
            Some(SseParsed::Event(e)) if e == "message_start"
        ));
        assert!(matches!(
            parse_sse_line("data: {\"x\":1}"),
            Some(SseParsed::Data(d)) if d == "{\"x\":1}"
        ));
        assert!(parse_sse_line(": keepalive").is_none());
    }

    #[test]
    fn tool_block_emits_start_then_complete() {
        let mut state = StreamState::default();

        state.current_event = "content_block_start".into();
        let events = parse_data_block(
            &mut state,
            r#"{"content_block":{"type":"tool_use","id":"tu_1","name":"web_search"}}"#,
        );
        assert!(matches!(
            &events[..],
            [StreamEvent::ToolUseStart { id, name }] if id == "tu_1" && name == "web_search"
        ));

        state.current_event = "content_block_delta".into();
        parse_data_block(
            &mut state,
            r#"{"delta":{"type":"input_json_delta","partial_json":"{\"query\":"}}"#,
        );
        parse_data_block(
            &mut state,
            r#"{"delta":{"type":"input_json_delta","partial_json":"\"rust\"}"}}"#,
        );

        state.current_event = "content_block_stop".into();
        let events = parse_data_block(&mut state, "{}");
        match &events[..] {
            [StreamEvent::ToolUseComplete { id, name, input }] => {
                assert_eq!(id, "tu_1");
                assert_eq!(name, "web_search");
                assert_eq!(input["query"], "rust");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn thinking_and_text_deltas() {
        let mut state = StreamState::default();
        state.current_event = "content_block_delta".into();

        let events = parse_data_block(
            &mut state,
            r#"{"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
        );
        assert!(matches!(&events[..], [StreamEvent::ThinkingDelta { text }] if text == "hmm"));

        let events = parse_data_block(
            &mut state,
            r#"{"delta":{"type":"text_delta","text":"Hello"}}"#,
        );
        assert!(matches!(&events[..], [StreamEvent::TextDelta { text }] if text == "Hello"));
    }

    #[test]
    fn message_delta_captures_stop_reason_and_usage() {
        let mut state = StreamState::default();
        state.current_event = "message_delta".into();
        parse_data_block(
            &mut state,
            r#"{"delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":77}}"#,
        );
        assert_eq!(state.stop_reason, "tool_use");
        assert_eq!(state.usage.output_tokens, 77);
    }

    #[test]
    fn malformed_tool_input_degrades_to_empty_object() {
        let mut state = StreamState::default();
        state.current_event = "content_block_start".into();
        parse_data_block(
            &mut state,
            r#"{"content_block":{"type":"tool_use","id":"tu_2","name":"x"}}"#,
        );
        state.current_event = "content_block_delta".into();
        parse_data_block(
            &mut state,
            r#"{"delta":{"type":"input_json_delta","partial_json":"{\"broken\":"}}"#,
        );
        state.current_event = "content_block_stop".into();
        let events = parse_data_block(&mut state, "{}");
        match &events[..] {
            [StreamEvent::ToolUseComplete { input, .. }] => {
                assert!(input.as_object().unwrap().is_empty());
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
