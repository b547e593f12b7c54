//! Deliver a cached exec artifact to the user's chat.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use quill_files::FileManager;

use super::{file_content_entry, tool_error, with_meta, Invocation, Tool};

pub struct DeliverFile {
    pub files: Arc<FileManager>,
}

#[async_trait]
impl Tool for DeliverFile {
    fn name(&self) -> &'static str {
        "deliver_file"
    }

    fn description(&self) -> &'static str {
        "Send a previously generated artifact (exec_* temp id) to the user."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "temp_id": { "type": "string", "description": "exec_* artifact id" },
            },
            "required": ["temp_id"],
        })
    }

    async fn execute(&self, input: Value, _inv: &Invocation) -> Value {
        let Some(temp_id) = input.get("temp_id").and_then(|v| v.as_str()) else {
            return tool_error("temp_id is required");
        };
        if !temp_id.starts_with("exec_") {
            return tool_error("deliver_file only accepts exec_* artifact ids");
        }

        let started = Instant::now();
        match self.files.get_file(temp_id, false).await {
            Ok((bytes, meta)) => {
                let mut out = Map::new();
                out.insert("delivered".into(), json!(true));
                out.insert("filename".into(), json!(meta.filename.clone()));
                out.insert("size".into(), json!(bytes.len()));
                out.insert(
                    "_file_contents".into(),
                    json!([file_content_entry(&meta.filename, &meta.mime_type, &bytes)]),
                );
                with_meta(out, started.elapsed().as_secs_f64())
            }
            Err(e) => tool_error(e.to_string()),
        }
    }
}
