//! Render LaTeX to an image. Free tool.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{file_content_entry, tool_error, with_meta, Invocation, Tool};

#[derive(Clone)]
pub struct LatexClient {
    client: reqwest::Client,
    base_url: String,
}

impl LatexClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn render(&self, latex: &str) -> Result<Vec<u8>, String> {
        let url = format!("{}/render", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "latex": latex, "format": "png" }))
            .send()
            .await
            .map_err(|e| format!("latex service unreachable: {e}"))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("latex render error {status}: {text}"));
        }
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| format!("latex response read failed: {e}"))
    }
}

pub struct RenderLatex {
    pub client: LatexClient,
}

#[async_trait]
impl Tool for RenderLatex {
    fn name(&self) -> &'static str {
        "render_latex"
    }

    fn description(&self) -> &'static str {
        "Render a LaTeX snippet to a PNG image."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "latex": { "type": "string" },
            },
            "required": ["latex"],
        })
    }

    async fn execute(&self, input: Value, _inv: &Invocation) -> Value {
        let Some(latex) = input.get("latex").and_then(|v| v.as_str()) else {
            return tool_error("latex is required");
        };
        let started = Instant::now();
        match self.client.render(latex).await {
            Ok(bytes) => {
                let mut out = Map::new();
                out.insert("rendered".into(), json!(true));
                out.insert("size".into(), json!(bytes.len()));
                out.insert(
                    "_file_contents".into(),
                    json!([file_content_entry("formula.png", "image/png", &bytes)]),
                );
                with_meta(out, started.elapsed().as_secs_f64())
            }
            Err(e) => tool_error(e),
        }
    }
}
