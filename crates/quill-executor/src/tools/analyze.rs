//! Vision analysis tools: one-shot model calls over an uploaded file.
//!
//! `analyze_image` and `analyze_pdf` share the same skeleton and differ only
//! in the content-block type wrapping the `claude_file_id`.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use quill_claude::{pricing, AnthropicClient, ChatRequest};

use super::{tool_error, with_meta, Invocation, Tool};

const ANALYSIS_MODEL: &str = "claude-sonnet-4-5";
const ANALYSIS_MAX_TOKENS: u32 = 2048;

async fn analyze(
    client: &AnthropicClient,
    block_type: &str,
    claude_file_id: &str,
    question: &str,
) -> Value {
    let started = Instant::now();
    let mut request = ChatRequest::new(ANALYSIS_MODEL, "", ANALYSIS_MAX_TOKENS);
    request.messages.push(json!({
        "role": "user",
        "content": [
            {
                "type": block_type,
                "source": { "type": "file", "file_id": claude_file_id },
            },
            { "type": "text", "text": question },
        ],
    }));

    match client.send(&request).await {
        Ok(resp) => {
            let cost = pricing::turn_cost(&resp.model, &resp.usage);
            let tokens_used = resp.usage.input_tokens + resp.usage.output_tokens;
            debug!(claude_file_id, tokens_used, cost = %cost, "analysis complete");
            let mut out = Map::new();
            out.insert("analysis".into(), json!(resp.text));
            out.insert("tokens_used".into(), json!(tokens_used));
            out.insert("cost_usd".into(), json!(cost.to_string()));
            out.insert("_model_id".into(), json!(resp.model));
            out.insert("_input_tokens".into(), json!(resp.usage.input_tokens));
            out.insert("_output_tokens".into(), json!(resp.usage.output_tokens));
            out.insert(
                "_cache_read_tokens".into(),
                json!(resp.usage.cache_read_input_tokens),
            );
            out.insert(
                "_cache_creation_tokens".into(),
                json!(resp.usage.cache_creation_input_tokens),
            );
            with_meta(out, started.elapsed().as_secs_f64())
        }
        Err(e) => tool_error(format!("analysis failed: {e}")),
    }
}

/// One-shot analysis reduced to a single JSON value, for embedding in
/// another tool's result (preview_file's vision branch).
pub async fn analyze_for_preview(
    client: &AnthropicClient,
    block_type: &str,
    claude_file_id: &str,
    question: &str,
) -> Value {
    let result = analyze(client, block_type, claude_file_id, question).await;
    result
        .get("analysis")
        .cloned()
        .unwrap_or_else(|| result.get("error").cloned().unwrap_or(Value::Null))
}

pub struct AnalyzeImage {
    pub client: AnthropicClient,
}

#[async_trait]
impl Tool for AnalyzeImage {
    fn name(&self) -> &'static str {
        "analyze_image"
    }

    fn description(&self) -> &'static str {
        "Analyze an uploaded image and answer a question about it."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "claude_file_id": { "type": "string" },
                "question": { "type": "string" },
            },
            "required": ["claude_file_id", "question"],
        })
    }

    async fn execute(&self, input: Value, _inv: &Invocation) -> Value {
        let Some(file_id) = input.get("claude_file_id").and_then(|v| v.as_str()) else {
            return tool_error("claude_file_id is required");
        };
        let Some(question) = input.get("question").and_then(|v| v.as_str()) else {
            return tool_error("question is required");
        };
        analyze(&self.client, "image", file_id, question).await
    }
}

pub struct AnalyzePdf {
    pub client: AnthropicClient,
}

#[async_trait]
impl Tool for AnalyzePdf {
    fn name(&self) -> &'static str {
        "analyze_pdf"
    }

    fn description(&self) -> &'static str {
        "Analyze an uploaded PDF document and answer a question about it."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "claude_file_id": { "type": "string" },
                "question": { "type": "string" },
            },
            "required": ["claude_file_id", "question"],
        })
    }

    async fn execute(&self, input: Value, _inv: &Invocation) -> Value {
        let Some(file_id) = input.get("claude_file_id").and_then(|v| v.as_str()) else {
            return tool_error("claude_file_id is required");
        };
        let Some(question) = input.get("question").and_then(|v| v.as_str()) else {
            return tool_error("question is required");
        };
        analyze(&self.client, "document", file_id, question).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::retry::RetryPolicy;
    use tokio_util::sync::CancellationToken;

    fn invocation() -> Invocation {
        Invocation {
            user_id: 1,
            chat_id: 2,
            thread_id: 3,
            message_id: 4,
            model_id: "claude-sonnet-4-5".into(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn missing_inputs_are_rejected() {
        let tool = AnalyzeImage {
            client: AnthropicClient::new(
                "k".into(),
                Some("http://127.0.0.1:1".into()),
                RetryPolicy::new(1, 0.001, 0.002),
            ),
        };
        let result = tool.execute(json!({"question": "what"}), &invocation()).await;
        assert!(result["error"].as_str().unwrap().contains("claude_file_id"));
        let result = tool
            .execute(json!({"claude_file_id": "file_1"}), &invocation())
            .await;
        assert!(result["error"].as_str().unwrap().contains("question"));
    }
}
