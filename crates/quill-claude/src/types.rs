use serde::{Deserialize, Serialize};

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Token usage for one API turn, including prompt-cache accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_read_input_tokens: u32,
    #[serde(default)]
    pub cache_creation_input_tokens: u32,
}

/// Request to the Messages API.
///
/// `messages` are raw JSON content-block arrays — the executor builds
/// structured blocks (image, document, tool_use, tool_result) that can't be
/// represented as plain strings.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub tools: Vec<ToolDefinition>,
    /// Server-side tool entries (web search/fetch) passed through verbatim —
    /// their wire shape differs from custom tools.
    pub server_tools: Vec<serde_json::Value>,
    /// Extended-thinking token budget; None disables the thinking block.
    pub thinking_budget: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            messages: Vec::new(),
            max_tokens,
            tools: Vec::new(),
            server_tools: Vec::new(),
            thinking_budget: None,
        }
    }

    /// Append a plain-text user message.
    pub fn push_user_text(&mut self, text: &str) {
        self.messages
            .push(serde_json::json!({ "role": "user", "content": text }));
    }
}

/// Non-streaming response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub model: String,
    pub stop_reason: String,
    pub usage: Usage,
    pub tool_calls: Vec<ToolCall>,
}

/// Events emitted while consuming a streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental internal reasoning (extended thinking).
    ThinkingDelta { text: String },

    /// Incremental visible text.
    TextDelta { text: String },

    /// A tool_use block opened — the name is known before the input finishes
    /// streaming, which is what lets the display show a marker immediately.
    ToolUseStart { id: String, name: String },

    /// A tool_use block closed with its fully accumulated JSON input.
    ToolUseComplete {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Stream completed.
    MessageEnd {
        model: String,
        stop_reason: String,
        usage: Usage,
    },

    /// Error mid-stream; no further events follow.
    Error { message: String },
}
