//! Web search and fetch via the provider's server-side tools.
//!
//! These run as one-shot Messages calls where the server tool does the work;
//! the answer text plus citation count come back as the tool result.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use quill_claude::{pricing, AnthropicClient, ChatRequest};

use super::{tool_error, with_meta, Invocation, Tool};

const WEB_MODEL: &str = "claude-sonnet-4-5";
const WEB_MAX_TOKENS: u32 = 2048;
/// Flat per-search surcharge on top of token cost.
const SEARCH_SURCHARGE_USD: &str = "0.0100";

async fn one_shot_server_tool(
    client: &AnthropicClient,
    server_tool: Value,
    prompt: &str,
) -> Result<(String, quill_claude::Usage, String), String> {
    let mut request = ChatRequest::new(WEB_MODEL, "", WEB_MAX_TOKENS);
    request.server_tools.push(server_tool);
    request.push_user_text(prompt);
    match client.send(&request).await {
        Ok(resp) => Ok((resp.text, resp.usage, resp.model)),
        Err(e) => Err(e.to_string()),
    }
}

fn usage_meta(out: &mut Map<String, Value>, model: &str, usage: &quill_claude::Usage) {
    out.insert("_model_id".into(), json!(model));
    out.insert("_input_tokens".into(), json!(usage.input_tokens));
    out.insert("_output_tokens".into(), json!(usage.output_tokens));
    out.insert(
        "_cache_read_tokens".into(),
        json!(usage.cache_read_input_tokens),
    );
    out.insert(
        "_cache_creation_tokens".into(),
        json!(usage.cache_creation_input_tokens),
    );
}

pub struct WebSearch {
    pub client: AnthropicClient,
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web and summarize results with citations."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, input: Value, _inv: &Invocation) -> Value {
        let Some(query) = input.get("query").and_then(|v| v.as_str()) else {
            return tool_error("query is required");
        };
        let started = Instant::now();
        let server_tool = json!({
            "type": "web_search_20250305",
            "name": "web_search",
            "max_uses": 3,
        });
        match one_shot_server_tool(&self.client, server_tool, query).await {
            Ok((text, usage, model)) => {
                let token_cost = pricing::turn_cost(&model, &usage);
                let surcharge: quill_core::Usd = SEARCH_SURCHARGE_USD.parse().expect("const price");
                let mut out = Map::new();
                out.insert("results".into(), json!(text));
                out.insert("cost_usd".into(), json!((token_cost + surcharge).to_string()));
                usage_meta(&mut out, &model, &usage);
                with_meta(out, started.elapsed().as_secs_f64())
            }
            Err(e) => tool_error(format!("web search failed: {e}")),
        }
    }
}

pub struct WebFetch {
    pub client: AnthropicClient,
}

#[async_trait]
impl Tool for WebFetch {
    fn name(&self) -> &'static str {
        "web_fetch"
    }

    fn description(&self) -> &'static str {
        "Fetch a URL and return its content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
            },
            "required": ["url"],
        })
    }

    async fn execute(&self, input: Value, _inv: &Invocation) -> Value {
        let Some(url) = input.get("url").and_then(|v| v.as_str()) else {
            return tool_error("url is required");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return tool_error("url must be http(s)");
        }
        let started = Instant::now();
        let server_tool = json!({
            "type": "web_fetch_20250910",
            "name": "web_fetch",
            "max_uses": 1,
        });
        let prompt = format!("Fetch {url} and return its main content.");
        match one_shot_server_tool(&self.client, server_tool, &prompt).await {
            Ok((text, usage, model)) => {
                let cost = pricing::turn_cost(&model, &usage);
                let mut out = Map::new();
                out.insert("content".into(), json!(text));
                out.insert("content_tokens".into(), json!(usage.output_tokens));
                out.insert("cost_usd".into(), json!(cost.to_string()));
                usage_meta(&mut out, &model, &usage);
                with_meta(out, started.elapsed().as_secs_f64())
            }
            Err(e) => tool_error(format!("web fetch failed: {e}")),
        }
    }
}
