//! Tool surface exposed to the LLM.
//!
//! Every tool returns a JSON object. A result without an `error` key is a
//! success. Underscore-prefixed keys are metadata consumed by the dispatcher
//! and stripped before the result is fed back to the model:
//! `_duration`, `_model_id`, `_input_tokens`, `_output_tokens`,
//! `_cache_read_tokens`, `_cache_creation_tokens`, `_file_contents`,
//! `_force_turn_break`, `_already_charged`.

pub mod analyze;
pub mod deliver_file;
pub mod execute_python;
pub mod generate_image;
pub mod preview_file;
pub mod registry;
pub mod render_latex;
pub mod transcribe;
pub mod web;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

/// Per-batch context handed to each tool execution.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub user_id: i64,
    pub chat_id: i64,
    pub thread_id: i64,
    pub message_id: i64,
    pub model_id: String,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, input: Value, inv: &Invocation) -> Value;
}

/// Error result in the conventional shape.
pub fn tool_error(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

/// Merge metadata keys into a success result.
pub fn with_meta(mut result: Map<String, Value>, duration_secs: f64) -> Value {
    result.insert("_duration".into(), json!(duration_secs));
    Value::Object(result)
}

/// A `_file_contents` entry: filename, mime and base64 payload.
pub fn file_content_entry(filename: &str, mime_type: &str, bytes: &[u8]) -> Value {
    use base64::Engine;
    json!({
        "filename": filename,
        "mime_type": mime_type,
        "data": base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Decode a `_file_contents` entry back into bytes.
pub fn decode_file_content(entry: &Value) -> Option<crate::draft::DeliverableFile> {
    use base64::Engine;
    let filename = entry.get("filename")?.as_str()?.to_string();
    let mime_type = entry.get("mime_type")?.as_str()?.to_string();
    let data = entry.get("data")?.as_str()?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(data).ok()?;
    Some(crate::draft::DeliverableFile {
        filename,
        mime_type,
        bytes,
        caption: entry
            .get("caption")
            .and_then(|c| c.as_str())
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_content_roundtrip() {
        let entry = file_content_entry("a.png", "image/png", &[1, 2, 3]);
        let decoded = decode_file_content(&entry).unwrap();
        assert_eq!(decoded.filename, "a.png");
        assert_eq!(decoded.bytes, vec![1, 2, 3]);
        assert!(decoded.is_image());
    }

    #[test]
    fn error_shape() {
        let e = tool_error("boom");
        assert_eq!(e["error"], "boom");
    }
}
