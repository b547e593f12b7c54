//! Lightweight file preview: parse what can be parsed locally, describe the
//! rest, and fall back to model analysis for images and PDFs when a question
//! is asked.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use quill_claude::AnthropicClient;
use quill_files::{FileManager, FileMeta};

use super::{tool_error, with_meta, Invocation, Tool};

const DEFAULT_MAX_ROWS: usize = 20;
const DEFAULT_MAX_CHARS: usize = 2000;

pub struct PreviewFile {
    pub files: Arc<FileManager>,
    pub client: AnthropicClient,
}

#[async_trait]
impl Tool for PreviewFile {
    fn name(&self) -> &'static str {
        "preview_file"
    }

    fn description(&self) -> &'static str {
        "Preview a file's content: CSV rows, text lines, or a vision summary \
         for images and PDFs."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_id": { "type": "string" },
                "max_rows": { "type": "integer" },
                "max_chars": { "type": "integer" },
                "question": { "type": "string" },
            },
            "required": ["file_id"],
        })
    }

    async fn execute(&self, input: Value, _inv: &Invocation) -> Value {
        let Some(file_id) = input.get("file_id").and_then(|v| v.as_str()) else {
            return tool_error("file_id is required");
        };
        let max_rows = input
            .get("max_rows")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_ROWS);
        let max_chars = input
            .get("max_chars")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);
        let question = input.get("question").and_then(|v| v.as_str());

        let started = Instant::now();
        let (bytes, meta) = match self.files.get_file(file_id, true).await {
            Ok(v) => v,
            Err(e) => return tool_error(e.to_string()),
        };

        let mut out = preview(&bytes, &meta, max_rows, max_chars);

        // Vision kinds with a question go to the model.
        if let Some(question) = question {
            let is_vision = meta.mime_type.starts_with("image/")
                || meta.mime_type == "application/pdf";
            if is_vision {
                if let Some(claude_file_id) = &meta.claude_file_id {
                    let block = if meta.mime_type == "application/pdf" {
                        "document"
                    } else {
                        "image"
                    };
                    let analysis =
                        super::analyze::analyze_for_preview(&self.client, block, claude_file_id, question)
                            .await;
                    out.insert("analysis".into(), analysis);
                }
            }
        }

        with_meta(out, started.elapsed().as_secs_f64())
    }
}

/// Pure classification + extraction over the bytes.
fn preview(bytes: &[u8], meta: &FileMeta, max_rows: usize, max_chars: usize) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("filename".into(), json!(meta.filename));
    out.insert("mime_type".into(), json!(meta.mime_type));
    out.insert("size".into(), json!(meta.file_size));

    let mime = meta.mime_type.as_str();
    if mime == "text/csv" || meta.filename.ends_with(".csv") {
        if let Ok(text) = std::str::from_utf8(bytes) {
            let rows: Vec<&str> = text.lines().take(max_rows).collect();
            let total = text.lines().count();
            out.insert("preview_kind".into(), json!("csv"));
            out.insert("rows".into(), json!(rows));
            out.insert("total_rows".into(), json!(total));
            return out;
        }
    }

    if mime.starts_with("text/")
        || mime == "application/json"
        || mime == "application/xml"
    {
        if let Ok(text) = std::str::from_utf8(bytes) {
            let clipped: String = text.chars().take(max_chars).collect();
            out.insert("preview_kind".into(), json!("text"));
            out.insert("truncated".into(), json!(text.chars().count() > max_chars));
            out.insert("content".into(), json!(clipped));
            return out;
        }
    }

    if mime.starts_with("image/") {
        out.insert("preview_kind".into(), json!("image"));
        out.insert(
            "hint".into(),
            json!("Pass a question to get a vision description, or use analyze_image."),
        );
        return out;
    }

    if mime == "application/pdf" {
        out.insert("preview_kind".into(), json!("pdf"));
        out.insert(
            "hint".into(),
            json!("Pass a question to get a summary, or use analyze_pdf."),
        );
        return out;
    }

    if mime.starts_with("audio/") || mime.starts_with("video/") {
        out.insert("preview_kind".into(), json!("media"));
        out.insert(
            "hint".into(),
            json!("Use transcribe_audio to get the spoken content."),
        );
        return out;
    }

    out.insert("preview_kind".into(), json!("binary"));
    out.insert(
        "hint".into(),
        json!("Binary content; use execute_python to inspect it programmatically."),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_files::FileSourceTier;

    fn meta(filename: &str, mime: &str, size: usize) -> FileMeta {
        FileMeta {
            filename: filename.into(),
            mime_type: mime.into(),
            file_size: size,
            source: FileSourceTier::ExecCache,
            claude_file_id: None,
            context: None,
            preview: None,
        }
    }

    #[test]
    fn csv_preview_caps_rows() {
        let data = (0..100).map(|i| format!("a{i},b{i}")).collect::<Vec<_>>().join("\n");
        let out = preview(data.as_bytes(), &meta("t.csv", "text/csv", data.len()), 5, 1000);
        assert_eq!(out["preview_kind"], "csv");
        assert_eq!(out["rows"].as_array().unwrap().len(), 5);
        assert_eq!(out["total_rows"], 100);
    }

    #[test]
    fn text_preview_truncates_chars() {
        let data = "x".repeat(5000);
        let out = preview(data.as_bytes(), &meta("t.txt", "text/plain", 5000), 10, 100);
        assert_eq!(out["preview_kind"], "text");
        assert_eq!(out["truncated"], true);
        assert_eq!(out["content"].as_str().unwrap().len(), 100);
    }

    #[test]
    fn media_and_binary_get_hints() {
        let out = preview(&[0u8; 4], &meta("a.mp3", "audio/mpeg", 4), 10, 100);
        assert_eq!(out["preview_kind"], "media");
        let out = preview(&[0u8; 4], &meta("a.bin", "application/octet-stream", 4), 10, 100);
        assert_eq!(out["preview_kind"], "binary");
    }
}
