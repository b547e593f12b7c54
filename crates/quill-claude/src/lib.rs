//! Anthropic API plumbing: Messages (streaming and not), Files, and the
//! speech-to-text client, plus the model pricing table.

pub mod client;
pub mod files;
pub mod pricing;
pub mod speech;
pub mod sse;
pub mod types;

pub use client::{AnthropicClient, ClaudeError};
pub use files::FilesClient;
pub use speech::{SpeechClient, Transcript};
pub use types::{ChatRequest, ChatResponse, StreamEvent, ToolCall, ToolDefinition, Usage};
