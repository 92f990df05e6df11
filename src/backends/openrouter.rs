//! OpenRouter adapter.
//!
//! Same wire format as DeepSeek, plus the `HTTP-Referer` / `X-Title`
//! attribution headers OpenRouter recommends, and sampling defaults applied
//! when the caller leaves them unset.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
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

const APP_TITLE: &str = "llm-relay";

const DEFAULTS: SamplingDefaults = SamplingDefaults {
    temperature: Some(0.7),
    max_tokens: Some(4096),
};

pub struct OpenRouterBackend {
    upstream: Upstream,
    models: ModelMap,
    keys: ApiKeyPolicy,
    stamper: Arc<dyn Stamper>,
}

impl OpenRouterBackend {
    pub fn new(
        settings: BackendSettings,
        referer: Option<&str>,
        stamper: Arc<dyn Stamper>,
    ) -> anyhow::Result<Self> {
        let key = settings
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("openrouter backend requires an API key"))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-title"),
            HeaderValue::from_static(APP_TITLE),
        );
        if let Some(referer) = referer {
            headers.insert(
                HeaderName::from_static("http-referer"),
                HeaderValue::from_str(referer).context("invalid `referer` header value")?,
            );
        }

        let upstream = Upstream::new(&settings.endpoint, Some(key), headers, settings.timeout)?;
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
        debug!(%requested, %model, stream = request.stream, "openrouter chat completion");

        let body = compat::build_request(&request, model, DEFAULTS);
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
impl Backend for OpenRouterBackend {
    fn name(&self) -> &'static str {
        "openrouter"
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
