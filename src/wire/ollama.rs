//! Ollama native `/api/chat` shape.
//!
//! No tool support, no `choices[]`, no `usage` envelope: each response line
//! carries one message fragment plus a `done` flag.

use serde::{Deserialize, Serialize};

use super::openai::Role;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: String,
}

/// A full non-streaming response, or one line of a streaming one. The role
/// is always `assistant` and the model is the caller's, so neither is decoded.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatResponse {
    /// RFC 3339 timestamp, e.g. `2024-05-01T12:00:00.123456Z`.
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub message: ResponseMessage,
    #[serde(default)]
    pub done: bool,
    /// `"stop"`, `"length"`, … on the final line of newer Ollama releases.
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    /// Ollama reports mid-stream failures as `{"error":"…"}` lines.
    #[serde(default)]
    pub error: Option<String>,
}
