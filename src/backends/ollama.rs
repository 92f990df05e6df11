//! Ollama adapter.
//!
//! Talks to Ollama's native `/api/chat`, which has no tools, no `choices[]`
//! and streams newline-delimited JSON rather than SSE. Keyless deployments
//! run under [`ApiKeyPolicy::AllowAll`]; when a key is configured it is both
//! sent upstream and required from callers.

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::upstream::Upstream;
use super::{Backend, BackendSettings, ModelMap};
use crate::auth::ApiKeyPolicy;
use crate::convert;
use crate::error::RelayError;
use crate::stamp::{parse_rfc3339, Stamper};
use crate::stream::{ChunkTranslator, Step};
use crate::wire::ollama::{ChatRequest, ChatResponse};
use crate::wire::openai::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, ChunkChoice,
    Delta, Message, Model, Role, Usage, CHAT_COMPLETION_CHUNK_OBJECT, CHAT_COMPLETION_OBJECT,
};
use crate::{stream, unary};

const CHAT_PATH: &str = "/chat";

pub struct OllamaBackend {
    upstream: Upstream,
    models: ModelMap,
    keys: ApiKeyPolicy,
    stamper: Arc<dyn Stamper>,
}

impl OllamaBackend {
    pub fn new(settings: BackendSettings, stamper: Arc<dyn Stamper>) -> anyhow::Result<Self> {
        let upstream = Upstream::new(
            &settings.endpoint,
            settings.api_key.as_deref(),
            HeaderMap::new(),
            settings.timeout,
        )?;
        let keys = settings.key_policy()?;
        if !keys.is_enforced() {
            info!("ollama backend has no API key; accepting all callers");
        }
        Ok(Self {
            upstream,
            models: settings.models,
            keys,
            stamper,
        })
    }

    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: ChatCompletionRequest,
    ) -> Result<Response, RelayError> {
        let requested = request.model.clone();
        let model = self.models.resolve(&requested);
        debug!(%requested, %model, stream = request.stream, "ollama chat completion");

        if request.tools.is_some() || request.functions.is_some() {
            debug!("ollama does not take tool definitions; dropping them");
        }
        let body = ChatRequest {
            model: model.to_string(),
            messages: convert::to_ollama_messages(&request.messages),
            stream: request.stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .upstream
            .post_json(CHAT_PATH, &body, request.stream, cancel)
            .await?;

        if request.stream {
            let chunks = OllamaChunks {
                id: self.stamper.response_id(),
                model: requested,
                fallback_created: self.stamper.now(),
            };
            return Ok(stream::respond(response, chunks, cancel));
        }
        let stamper = self.stamper.as_ref();
        unary::respond(response, |r: ChatResponse| into_openai(r, &requested, stamper)).await
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn handle_chat_completion(
        &self,
        cancel: CancellationToken,
        request: ChatCompletionRequest,
    ) -> Response {
        self.complete(&cancel, request)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    }

    async fn list_models(&self) -> anyhow::Result<Vec<Model>> {
        Ok(self.models.describe(self.name(), self.stamper.now()))
    }

    fn validate_api_key(&self, candidate: &str) -> bool {
        self.keys.validate(candidate)
    }
}

/// `done_reason` to OpenAI `finish_reason`. Only `length` is distinguished.
fn finish_reason(done_reason: Option<&str>) -> String {
    match done_reason {
        Some("length") => "length".to_string(),
        _ => "stop".to_string(),
    }
}

fn usage(response: &ChatResponse) -> Option<Usage> {
    match (response.prompt_eval_count, response.eval_count) {
        (None, None) => None,
        (prompt, completion) => Some(Usage::new(prompt.unwrap_or(0), completion.unwrap_or(0))),
    }
}

fn into_openai(
    response: ChatResponse,
    requested_model: &str,
    stamper: &dyn Stamper,
) -> ChatCompletionResponse {
    let created = response
        .created_at
        .as_deref()
        .and_then(parse_rfc3339)
        .unwrap_or_else(|| stamper.now());
    let usage = usage(&response);
    ChatCompletionResponse {
        id: stamper.response_id(),
        object: CHAT_COMPLETION_OBJECT,
        created,
        model: requested_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::text(Role::Assistant, response.message.content),
            finish_reason: Some(finish_reason(response.done_reason.as_deref())),
        }],
        usage,
    }
}

/// Stream translator for Ollama's newline-delimited JSON.
struct OllamaChunks {
    id: String,
    model: String,
    fallback_created: i64,
}

impl ChunkTranslator for OllamaChunks {
    fn translate(&mut self, line: &str) -> Step {
        let response: ChatResponse = match serde_json::from_str(line.trim()) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "skipping unparseable ollama line");
                return Step::Skip;
            }
        };
        if let Some(message) = response.error.as_deref() {
            return Step::Error(serde_json::json!({
                "error": {"message": message, "type": "upstream_error"},
            }));
        }

        let created = response
            .created_at
            .as_deref()
            .and_then(parse_rfc3339)
            .unwrap_or(self.fallback_created);
        let finish = response
            .done
            .then(|| finish_reason(response.done_reason.as_deref()));
        let usage = if response.done { usage(&response) } else { None };

        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: CHAT_COMPLETION_CHUNK_OBJECT,
            created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: Some(Role::Assistant),
                    content: Some(response.message.content),
                    tool_calls: None,
                },
                finish_reason: finish,
            }],
            usage,
        };

        if response.done {
            Step::Final(chunk)
        } else {
            Step::Chunk(chunk)
        }
    }
}
