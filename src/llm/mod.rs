//! LLM module - transport to an OpenAI-compatible completion endpoint.
//!
//! The client is purely a transport: it sends the conversation and tool
//! schema with `tool_choice: "auto"` and returns the model's next message.
//! It never retries; a non-2xx response becomes an [`LlmError::Http`]
//! carrying the status code and body.

mod openai;
mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use openai::{describe_connection_error, OpenAiClient, CONNECTION_TEST_PROMPT};
pub use types::{
    ChatMessage, CompletionOptions, FunctionCall, FunctionSchema, Role, ToolCall, ToolSchema,
};

/// Transport failures. Fatal to the turn that hit them.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM not configured: API key and base URL are required")]
    NotConfigured,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid completion response: {0}")]
    Decode(String),

    #[error("Completion response contained no choices")]
    EmptyResponse,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send the message history (and optional tool schema) and return the
    /// single next message the model proposes.
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
        options: &CompletionOptions,
    ) -> Result<ChatMessage, LlmError>;
}
