use tokio::sync::mpsc;
use tracing::{debug, warn};

use quill_core::retry::RetryPolicy;

use crate::sse;
use crate::types::{ChatRequest, ChatResponse, StreamEvent, ToolCall, Usage};

const API_VERSION: &str = "2023-06-01";
const FILES_BETA: &str = "files-api-2025-04-14";

#[derive(Debug, thiserror::Error)]
pub enum ClaudeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

impl ClaudeError {
    /// 5xx, connection failures and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClaudeError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ClaudeError::Api { status, .. } => *status >= 500,
            ClaudeError::RateLimited { .. } => true,
            ClaudeError::Parse(_) => false,
        }
    }
}

#[derive(Clone)]
pub struct AnthropicClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) retry: RetryPolicy,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            retry,
        }
    }

    pub(crate) fn headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("anthropic-beta", FILES_BETA)
    }

    /// Non-streaming Messages call. Retried on transient failures.
    pub async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ClaudeError> {
        let body = build_request_body(req, false);
        let url = format!("{}/v1/messages", self.base_url);

        let api_resp: ApiResponse = self
            .retry
            .run("anthropic", ClaudeError::is_retryable, || async {
                debug!(model = %req.model, "messages request");
                let resp = self
                    .headers(self.client.post(&url))
                    .header("content-type", "application/json")
                    .json(&body)
                    .send()
                    .await?;
                let resp = check_status(resp).await?;
                resp.json::<ApiResponse>()
                    .await
                    .map_err(|e| ClaudeError::Parse(e.to_string()))
            })
            .await?;

        Ok(parse_response(api_resp))
    }

    /// Streaming Messages call; events land on `tx` until MessageEnd/Error.
    /// Only the connection attempt is retried — once bytes flow, the SSE
    /// processor owns the stream.
    pub async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ClaudeError> {
        let body = build_request_body(req, true);
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .retry
            .run("anthropic_stream", ClaudeError::is_retryable, || async {
                debug!(model = %req.model, "streaming messages request");
                let resp = self
                    .headers(self.client.post(&url))
                    .header("content-type", "application/json")
                    .json(&body)
                    .send()
                    .await?;
                check_status(resp).await
            })
            .await?;

        sse::process_stream(resp, tx).await;
        Ok(())
    }
}

pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClaudeError> {
    let status = resp.status().as_u16();
    if status == 429 {
        let retry_after_ms = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(5000);
        return Err(ClaudeError::RateLimited { retry_after_ms });
    }
    if !resp.status().is_success() {
        let message = resp.text().await.unwrap_or_default();
        warn!(status, body = %message, "anthropic API error");
        return Err(ClaudeError::Api { status, message });
    }
    Ok(resp)
}

fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "system": req.system,
        "messages": req.messages,
        "stream": stream,
    });

    if !req.tools.is_empty() || !req.server_tools.is_empty() {
        let mut tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        tools.extend(req.server_tools.iter().cloned());
        body["tools"] = serde_json::Value::Array(tools);
    }

    if let Some(budget) = req.thinking_budget {
        body["thinking"] = serde_json::json!({
            "type": "enabled",
            "budget_tokens": budget,
        });
    }

    body
}

fn parse_response(api: ApiResponse) -> ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in api.content {
        match block.block_type.as_str() {
            "text" => {
                if let Some(t) = block.text {
                    text.push_str(&t);
                }
            }
            "tool_use" => {
                tool_calls.push(ToolCall {
                    id: block.id.unwrap_or_default(),
                    name: block.name.unwrap_or_default(),
                    input: block.input.unwrap_or(serde_json::Value::Null),
                });
            }
            _ => {}
        }
    }
    ChatResponse {
        text,
        model: api.model,
        stop_reason: api.stop_reason.unwrap_or_default(),
        usage: api.usage,
        tool_calls,
    }
}

#[derive(serde::Deserialize)]
struct ApiResponse {
    model: String,
    stop_reason: Option<String>,
    content: Vec<ApiContentBlock>,
    usage: Usage,
}

#[derive(serde::Deserialize)]
struct ApiContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_includes_tools_and_thinking() {
        let mut req = ChatRequest::new("claude-sonnet-4-5", "be useful", 1024);
        req.push_user_text("hi");
        req.tools.push(crate::types::ToolDefinition {
            name: "web_search".into(),
            description: "search".into(),
            input_schema: serde_json::json!({"type": "object"}),
        });
        req.thinking_budget = Some(2048);

        let body = build_request_body(&req, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["name"], "web_search");
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn response_parse_collects_text_and_tool_calls() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "model": "claude-sonnet-4-5",
                "stop_reason": "tool_use",
                "content": [
                    {"type": "text", "text": "Looking that up."},
                    {"type": "tool_use", "id": "tu_9", "name": "web_fetch",
                     "input": {"url": "https://example.com"}}
                ],
                "usage": {"input_tokens": 10, "output_tokens": 20}
            }"#,
        )
        .unwrap();
        let resp = parse_response(api);
        assert_eq!(resp.text, "Looking that up.");
        assert_eq!(resp.stop_reason, "tool_use");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "web_fetch");
    }
}
