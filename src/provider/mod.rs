//! Model API clients.

pub mod http;
pub mod openai_compatible;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatMessage, ToolCallRequest, Usage};

pub use openai_compatible::OpenAiCompatibleClient;

/// One chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Tool definitions in function-call schema; empty disables tools.
    pub tools: Vec<serde_json::Value>,
}

/// The model's reply to one request.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

/// Seam over the model API. One production implementation talks to any
/// OpenAI-compatible endpoint; tests script responses in process.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;
}
