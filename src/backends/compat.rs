//! Shared plumbing for providers that speak the chat-completions dialect
//! (DeepSeek and OpenRouter): request building, unary translation and the
//! stream chunk translator.

use serde_json::Value;
use tracing::{debug, warn};

use crate::convert;
use crate::stamp::Stamper;
use crate::stream::{sse_payload, ChunkTranslator, Step};
use crate::wire::deepseek::{ChatRequest, ChatResponse, StreamChunk};
use crate::wire::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice,
    CHAT_COMPLETION_CHUNK_OBJECT, CHAT_COMPLETION_OBJECT,
};

pub(super) const CHAT_PATH: &str = "/chat/completions";

/// Values filled in when the caller leaves them unset.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct SamplingDefaults {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

pub(super) fn build_request(
    request: &ChatCompletionRequest,
    model: &str,
    defaults: SamplingDefaults,
) -> ChatRequest {
    let tools = convert::provider_tools(request.tools.as_deref(), request.functions.as_deref());
    // tool_choice without tools is rejected upstream.
    let tool_choice = tools
        .as_ref()
        .and_then(|_| convert::narrow_tool_choice(&request.tool_choice));

    debug!(
        messages = request.messages.len(),
        tools = tools.as_ref().map_or(0, Vec::len),
        ?tool_choice,
        "built chat request"
    );

    ChatRequest {
        model: model.to_string(),
        messages: convert::to_chat_messages(&request.messages),
        stream: request.stream,
        temperature: request.temperature.or(defaults.temperature),
        max_tokens: request.max_tokens.or(defaults.max_tokens),
        tools,
        tool_choice,
    }
}

/// Provider response to the OpenAI envelope, reporting the requested model.
pub(super) fn into_openai(
    response: ChatResponse,
    requested_model: &str,
    stamper: &dyn Stamper,
) -> ChatCompletionResponse {
    debug!(upstream_model = %response.model, choices = response.choices.len(), "translating response");
    ChatCompletionResponse {
        id: if response.id.is_empty() {
            stamper.response_id()
        } else {
            response.id
        },
        object: CHAT_COMPLETION_OBJECT,
        created: if response.created == 0 {
            stamper.now()
        } else {
            response.created
        },
        model: requested_model.to_string(),
        choices: response
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: convert::from_provider_message(choice.message),
                finish_reason: choice.finish_reason,
            })
            .collect(),
        usage: response.usage,
    }
}

/// Stream translator for chat-completions SSE.
///
/// The chunk in which every choice carries a `finish_reason` is final.
///
/// Tool-call deltas pass through untouched: only the first fragment of a call
/// carries its name, so fragments cannot be filtered on an empty name here.
pub(super) struct ChatChunks {
    id: String,
    model: String,
    created: i64,
}

impl ChatChunks {
    pub fn new(id: String, model: String, created: i64) -> Self {
        Self { id, model, created }
    }
}

impl ChunkTranslator for ChatChunks {
    fn translate(&mut self, line: &str) -> Step {
        let Some(payload) = sse_payload(line) else {
            return Step::Skip;
        };
        if payload == "[DONE]" {
            return Step::Done;
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "skipping unparseable stream line");
                return Step::Skip;
            }
        };
        if value.get("error").is_some() {
            return Step::Error(value);
        }

        let chunk: StreamChunk = match serde_json::from_value(value) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "skipping malformed stream chunk");
                return Step::Skip;
            }
        };

        let finished = !chunk.choices.is_empty()
            && chunk.choices.iter().all(|c| c.finish_reason.is_some());
        let out = ChatCompletionChunk {
            id: self.id.clone(),
            object: CHAT_COMPLETION_CHUNK_OBJECT,
            created: if chunk.created == 0 { self.created } else { chunk.created },
            model: self.model.clone(),
            choices: chunk.choices,
            usage: chunk.usage,
        };
        // A finish reason on every choice ends the relay even if upstream
        // keeps the connection open.
        if finished {
            Step::Final(out)
        } else {
            Step::Chunk(out)
        }
    }
}
