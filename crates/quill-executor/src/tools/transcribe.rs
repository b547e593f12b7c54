//! Explicit transcription tool for audio/video files the normalizer uploaded
//! without auto-transcribing.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use quill_claude::SpeechClient;
use quill_files::FileManager;

use super::{tool_error, with_meta, Invocation, Tool};

pub struct TranscribeAudio {
    pub files: Arc<FileManager>,
    pub speech: SpeechClient,
}

#[async_trait]
impl Tool for TranscribeAudio {
    fn name(&self) -> &'static str {
        "transcribe_audio"
    }

    fn description(&self) -> &'static str {
        "Transcribe an audio or video file to text."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_id": { "type": "string", "description": "Any known file id" },
            },
            "required": ["file_id"],
        })
    }

    async fn execute(&self, input: Value, _inv: &Invocation) -> Value {
        let Some(file_id) = input.get("file_id").and_then(|v| v.as_str()) else {
            return tool_error("file_id is required");
        };

        let started = Instant::now();
        let (bytes, meta) = match self.files.get_file(file_id, true).await {
            Ok(v) => v,
            Err(e) => return tool_error(e.to_string()),
        };

        if !meta.mime_type.starts_with("audio/") && !meta.mime_type.starts_with("video/") {
            return tool_error(format!("{} is not an audio or video file", meta.filename));
        }

        match self
            .speech
            .transcribe(&meta.filename, &meta.mime_type, bytes)
            .await
        {
            Ok(t) => {
                let mut out = Map::new();
                out.insert("transcript".into(), json!(t.text));
                out.insert("duration".into(), json!(t.duration_seconds));
                out.insert("language".into(), json!(t.language));
                out.insert("cost_usd".into(), json!(t.cost_usd.to_string()));
                with_meta(out, started.elapsed().as_secs_f64())
            }
            Err(e) => tool_error(format!("transcription failed: {e}")),
        }
    }
}
