//! Sandboxed Python execution.
//!
//! Talks to the exec service over HTTP; input files are resolved through the
//! FileManager, generated files land in the exec cache (so the model can
//! deliver them later by temp_id) and in `_file_contents` for immediate
//! delivery.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use quill_cache::ExecCache;
use quill_files::FileManager;

use super::{file_content_entry, tool_error, with_meta, Invocation, Tool};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 120;
/// Flat price per execution.
const EXEC_COST_USD: &str = "0.0050";

#[derive(Clone)]
pub struct ExecClient {
    client: reqwest::Client,
    base_url: String,
}

impl ExecClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn run(&self, body: &Value, timeout_secs: u64) -> Result<ExecResponse, String> {
        let url = format!("{}/execute", self.base_url);
        let resp = self
            .client
            .post(&url)
            .timeout(std::time::Duration::from_secs(timeout_secs + 10))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("exec service unreachable: {e}"))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("exec service error {status}: {text}"));
        }
        resp.json::<ExecResponse>()
            .await
            .map_err(|e| format!("exec response unparseable: {e}"))
    }
}

#[derive(Deserialize)]
struct ExecResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    files: Vec<ExecFile>,
    #[serde(default)]
    execution_time: f64,
}

#[derive(Deserialize)]
struct ExecFile {
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    /// base64 payload
    data: String,
}

pub struct ExecutePython {
    pub exec: ExecClient,
    pub files: Arc<FileManager>,
    pub exec_cache: Arc<ExecCache>,
}

#[async_trait]
impl Tool for ExecutePython {
    fn name(&self) -> &'static str {
        "execute_python"
    }

    fn description(&self) -> &'static str {
        "Run Python code in a sandbox. Input files are available under /data; \
         generated files are returned and delivered to the user."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string" },
                "file_inputs": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "File ids to stage into the sandbox",
                },
                "requirements": {
                    "type": "array",
                    "items": { "type": "string" },
                },
                "timeout": { "type": "integer", "description": "Seconds, max 120" },
            },
            "required": ["code"],
        })
    }

    async fn execute(&self, input: Value, inv: &Invocation) -> Value {
        let Some(code) = input.get("code").and_then(|v| v.as_str()) else {
            return tool_error("code is required");
        };
        let timeout = input
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);

        let started = Instant::now();

        // Stage requested input files into the request body.
        let mut staged = Vec::new();
        if let Some(ids) = input.get("file_inputs").and_then(|v| v.as_array()) {
            for id in ids.iter().filter_map(|v| v.as_str()) {
                match self.files.get_file(id, true).await {
                    Ok((bytes, meta)) => staged.push(json!({
                        "name": meta.filename,
                        "data": base64::engine::general_purpose::STANDARD.encode(&bytes),
                    })),
                    Err(e) => return tool_error(format!("input file {id}: {e}")),
                }
            }
        }

        if inv.cancel.is_cancelled() {
            return tool_error("cancelled before execution");
        }

        let body = json!({
            "code": code,
            "files": staged,
            "requirements": input.get("requirements").cloned().unwrap_or(json!([])),
            "timeout": timeout,
        });

        let resp = match self.exec.run(&body, timeout).await {
            Ok(r) => r,
            Err(e) => return tool_error(e),
        };

        // Cache generated artifacts and prepare delivery entries.
        let mut generated_meta = Vec::new();
        let mut file_contents = Vec::new();
        for f in &resp.files {
            let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&f.data) else {
                warn!(name = %f.name, "exec artifact with invalid base64, skipping");
                continue;
            };
            let mime = f
                .mime_type
                .clone()
                .unwrap_or_else(|| quill_files::detect_mime(&bytes, &f.name, None));
            let meta = json!({
                "filename": f.name.clone(),
                "mime_type": mime.clone(),
                "context": code.chars().take(500).collect::<String>(),
            });
            match self.exec_cache.put(&f.name, bytes.clone(), meta) {
                Ok(temp_id) => {
                    generated_meta.push(json!({
                        "temp_id": temp_id,
                        "filename": f.name.clone(),
                        "mime_type": mime.clone(),
                        "size": bytes.len(),
                    }));
                    file_contents.push(file_content_entry(&f.name, &mime, &bytes));
                }
                Err(e) => warn!(name = %f.name, error = %e, "artifact not cached"),
            }
        }

        info!(
            thread_id = inv.thread_id,
            stdout_len = resp.stdout.len(),
            artifacts = generated_meta.len(),
            exec_time = resp.execution_time,
            "python execution finished"
        );

        let mut out = Map::new();
        out.insert("stdout".into(), json!(resp.stdout));
        out.insert("stderr".into(), json!(resp.stderr));
        out.insert("results".into(), json!(resp.results));
        out.insert("generated_files".into(), json!(generated_meta));
        out.insert("execution_time".into(), json!(resp.execution_time));
        out.insert("cost_usd".into(), json!(EXEC_COST_USD));
        if !file_contents.is_empty() {
            out.insert("_file_contents".into(), json!(file_contents));
        }
        with_meta(out, started.elapsed().as_secs_f64())
    }
}
