//! DeepSeek adapter.
//!
//! Speaks DeepSeek's `/chat/completions`, which differs from OpenAI's only in
//! string-only content, the missing `function` role and a narrower
//! `tool_choice`. Translation lives in [`super::compat`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::compat::{self, ChatChunks, SamplingDefaults, CHAT_PATH};
use super::upstream::Upstream;
use super::{Backend, BackendSettings, ModelMap};
use crate::auth::ApiKeyPolicy;
use crate::error::RelayError;
use crate::stamp::Stamper;
use crate::wire::deepseek::ChatResponse;
use crate::wire::openai::{ChatCompletionRequest, Model};
use crate::{stream, unary};

pub struct DeepSeekBackend {
    upstream: Upstream,
    models: ModelMap,
    keys: ApiKeyPolicy,
    stamper: Arc<dyn Stamper>,
}

impl DeepSeekBackend {
    pub fn new(settings: BackendSettings, stamper: Arc<dyn Stamper>) -> anyhow::Result<Self> {
        let key = settings
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("deepseek backend requires an API key"))?;
        let upstream = Upstream::new(&settings.endpoint, Some(key), HeaderMap::new(), settings.timeout)?;
        Ok(Self {
            upstream,
            keys: settings.key_policy()?,
            models: settings.models,
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
        debug!(%requested, %model, stream = request.stream, "deepseek chat completion");

        let body = compat::build_request(&request, model, SamplingDefaults::default());
        let response = self
            .upstream
            .post_json(CHAT_PATH, &body, request.stream, cancel)
            .await?;

        if request.stream {
            let chunks = ChatChunks::new(self.stamper.response_id(), requested, self.stamper.now());
            return Ok(stream::respond(response, chunks, cancel));
        }
        let stamper = self.stamper.as_ref();
        unary::respond(response, |r: ChatResponse| {
            compat::into_openai(r, &requested, stamper)
        })
        .await
    }
}

#[async_trait]
impl Backend for DeepSeekBackend {
    fn name(&self) -> &'static str {
        "deepseek"
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
