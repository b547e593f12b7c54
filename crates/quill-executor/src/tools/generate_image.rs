//! Image generation via the external imagegen service.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use quill_files::FileManager;

use super::{file_content_entry, tool_error, with_meta, Invocation, Tool};

/// Flat price per generated image.
const IMAGE_COST_USD: &str = "0.0400";

#[derive(Clone)]
pub struct ImageGenClient {
    client: reqwest::Client,
    base_url: String,
}

impl ImageGenClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn generate(&self, body: &Value) -> Result<GenResponse, String> {
        let url = format!("{}/generate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("imagegen unreachable: {e}"))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            // Content-policy rejections arrive as 4xx with an explanation.
            return Err(format!("imagegen error {status}: {text}"));
        }
        resp.json::<GenResponse>()
            .await
            .map_err(|e| format!("imagegen response unparseable: {e}"))
    }
}

#[derive(Deserialize)]
struct GenResponse {
    /// "generate" or "edit" (when source images were supplied).
    #[serde(default)]
    mode: Option<String>,
    /// base64 PNG
    image: String,
}

pub struct GenerateImage {
    pub client: ImageGenClient,
    pub files: Arc<FileManager>,
}

#[async_trait]
impl Tool for GenerateImage {
    fn name(&self) -> &'static str {
        "generate_image"
    }

    fn description(&self) -> &'static str {
        "Generate an image from a prompt, optionally editing source images."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string" },
                "source_file_ids": { "type": "array", "items": { "type": "string" } },
                "aspect_ratio": { "type": "string" },
                "image_size": { "type": "string" },
                "use_google_search": { "type": "boolean" },
            },
            "required": ["prompt"],
        })
    }

    async fn execute(&self, input: Value, inv: &Invocation) -> Value {
        let Some(prompt) = input.get("prompt").and_then(|v| v.as_str()) else {
            return tool_error("prompt is required");
        };

        let started = Instant::now();

        let mut sources = Vec::new();
        if let Some(ids) = input.get("source_file_ids").and_then(|v| v.as_array()) {
            for id in ids.iter().filter_map(|v| v.as_str()) {
                match self.files.get_file(id, true).await {
                    Ok((bytes, _)) => sources
                        .push(base64::engine::general_purpose::STANDARD.encode(&bytes)),
                    Err(e) => return tool_error(format!("source file {id}: {e}")),
                }
            }
        }

        if inv.cancel.is_cancelled() {
            return tool_error("cancelled before generation");
        }

        let had_sources = !sources.is_empty();
        let body = json!({
            "prompt": prompt,
            "sources": sources,
            "aspect_ratio": input.get("aspect_ratio"),
            "image_size": input.get("image_size"),
            "use_google_search": input.get("use_google_search").and_then(|v| v.as_bool()).unwrap_or(false),
        });

        let resp = match self.client.generate(&body).await {
            Ok(r) => r,
            Err(e) => return tool_error(e),
        };

        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(&resp.image) else {
            return tool_error("imagegen returned invalid base64");
        };

        let mode = resp
            .mode
            .unwrap_or_else(|| if had_sources { "edit" } else { "generate" }.to_string());
        info!(
            thread_id = inv.thread_id,
            mode = %mode,
            size = bytes.len(),
            "image generated"
        );

        let filename = "generated.png";
        let mut out = Map::new();
        out.insert("mode".into(), json!(mode));
        out.insert("cost_usd".into(), json!(IMAGE_COST_USD));
        out.insert(
            "_file_contents".into(),
            json!([file_content_entry(filename, "image/png", &bytes)]),
        );
        with_meta(out, started.elapsed().as_secs_f64())
    }
}
