//! Provider adapters behind one [`Backend`] contract.
//!
//! Exactly one backend is built at startup from [`BackendConfig`] and shared
//! as `Arc<dyn Backend>`. Each adapter owns its immutable settings (endpoint,
//! key, model map, timeout) and turns every failure into an OpenAI-shaped
//! response itself, so handlers never write fallback errors.

mod compat;
pub mod deepseek;
pub mod ollama;
pub mod openrouter;
pub mod upstream;

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::response::Response;
use tokio_util::sync::CancellationToken;

use crate::auth::ApiKeyPolicy;
use crate::config::{BackendConfig, Provider};
use crate::stamp::Stamper;
use crate::wire::openai::{ChatCompletionRequest, Model};

pub use deepseek::DeepSeekBackend;
pub use ollama::OllamaBackend;
pub use openrouter::OpenRouterBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable provider id: `deepseek`, `openrouter` or `ollama`.
    fn name(&self) -> &'static str;

    /// Serve one chat completion, unary or streamed, including its errors.
    ///
    /// Cancelling `cancel` aborts the upstream call and any stream relay.
    async fn handle_chat_completion(
        &self,
        cancel: CancellationToken,
        request: ChatCompletionRequest,
    ) -> Response;

    /// Served model ids, sorted.
    async fn list_models(&self) -> anyhow::Result<Vec<Model>>;

    /// Constant-time check of a caller's bearer token.
    fn validate_api_key(&self, candidate: &str) -> bool;
}

/// Public model names mapped onto provider model names.
#[derive(Debug, Clone)]
pub struct ModelMap {
    aliases: BTreeMap<String, String>,
    default_model: String,
}

impl ModelMap {
    pub fn new(
        aliases: impl IntoIterator<Item = (String, String)>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            aliases: aliases.into_iter().collect(),
            default_model: default_model.into(),
        }
    }

    /// Provider model for `requested`; unmapped names get the default model.
    pub fn resolve(&self, requested: &str) -> &str {
        self.aliases
            .get(requested)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }

    /// Public ids in sorted order, or just the default model when nothing is mapped.
    pub fn served(&self) -> Vec<&str> {
        if self.aliases.is_empty() {
            vec![self.default_model.as_str()]
        } else {
            self.aliases.keys().map(String::as_str).collect()
        }
    }

    pub fn describe(&self, owned_by: &str, created: i64) -> Vec<Model> {
        self.served()
            .into_iter()
            .map(|id| Model::new(id, created, owned_by))
            .collect()
    }
}

/// Immutable settings shared by every adapter.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub models: ModelMap,
    pub timeout: Duration,
}

impl BackendSettings {
    pub fn from_config(cfg: &BackendConfig) -> Self {
        Self {
            endpoint: cfg.endpoint().to_string(),
            api_key: cfg.api_key(),
            models: ModelMap::new(
                cfg.models.iter().map(|(k, v)| (k.clone(), v.clone())),
                cfg.default_model(),
            ),
            timeout: Duration::from_millis(cfg.timeout_ms),
        }
    }

    /// Key policy for inbound callers: the provider key, or allow-all when none.
    fn key_policy(&self) -> anyhow::Result<ApiKeyPolicy> {
        match self.api_key.as_deref() {
            Some(key) => ApiKeyPolicy::secret(key),
            None => Ok(ApiKeyPolicy::AllowAll),
        }
    }
}

/// Build the configured backend.
pub fn build(cfg: &BackendConfig, stamper: Arc<dyn Stamper>) -> anyhow::Result<Arc<dyn Backend>> {
    let settings = BackendSettings::from_config(cfg);
    let backend: Arc<dyn Backend> = match cfg.provider {
        Provider::DeepSeek => Arc::new(DeepSeekBackend::new(settings, stamper)?),
        Provider::OpenRouter => Arc::new(OpenRouterBackend::new(
            settings,
            cfg.referer.as_deref(),
            stamper,
        )?),
        Provider::Ollama => Arc::new(OllamaBackend::new(settings, stamper)?),
    };
    Ok(backend)
}
