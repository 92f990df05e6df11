//! DeepSeek chat-completions dialect.
//!
//! Close to OpenAI's, but content is always a plain string, the `function`
//! role does not exist, and `tool_choice` is limited to `"auto"` / `"none"`.
//! OpenRouter accepts and returns the same shape.

use serde::{Deserialize, Serialize};

use super::openai::{assistant_role, ChunkChoice, Role, Tool, ToolCall, Usage};

/// The only tool-choice values the provider accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    Auto,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Omitted entirely when the caller expressed no usable preference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoiceMode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Assistant message as returned by the provider. `content` is `null` on
/// pure tool-call turns.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseMessage {
    #[serde(default = "assistant_role")]
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created: i64,
    /// Provider-internal model id; never shown to the caller.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// One streamed frame. Choices already use the OpenAI delta layout; the
/// provider's id and model are replaced per stream and not decoded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_unset_optional_fields() {
        let req = ChatRequest {
            model: "deepseek-chat".into(),
            messages: vec![],
            stream: false,
            temperature: None,
            max_tokens: None,
            tools: None,
            tool_choice: None,
        };
        let out = serde_json::to_value(&req).unwrap();
        assert_eq!(out, json!({"model": "deepseek-chat", "messages": [], "stream": false}));
    }

    #[test]
    fn tool_choice_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ToolChoiceMode::Auto).unwrap(), json!("auto"));
        assert_eq!(serde_json::to_value(ToolChoiceMode::None).unwrap(), json!("none"));
    }

    #[test]
    fn response_tolerates_null_content_and_missing_usage() {
        let resp: ChatResponse = serde_json::from_value(json!({
            "id": "abc",
            "created": 1700000000,
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function",
                                    "function": {"name": "lookup", "arguments": "{}"}}],
                },
                "finish_reason": "tool_calls",
            }],
        }))
        .unwrap();

        assert!(resp.usage.is_none());
        assert!(resp.choices[0].message.content.is_none());
        assert_eq!(resp.choices[0].message.tool_calls.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn stream_chunk_decodes_delta_layout() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "id": "abc",
            "object": "chat.completion.chunk",
            "created": 1,
            "model": "deepseek-chat",
            "choices": [{"index": 0, "delta": {"content": "Hel"}, "finish_reason": null}],
        }))
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));
    }
}
