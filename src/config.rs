//! Configuration types for llm-relay.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. Invalid configs are rejected with a clear error
//! rather than silently falling back to defaults.
//!
//! # Example
//! ```toml
//! [server]
//! port = 9000
//!
//! [backend]
//! provider    = "deepseek"
//! api_key_env = "DEEPSEEK_API_KEY"
//!
//! [backend.models]
//! "gpt-4o" = "deepseek-chat"
//! ```

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Which upstream dialect the relay speaks.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// DeepSeek `/chat/completions`.
    DeepSeek,
    /// OpenRouter. Same wire format as DeepSeek plus attribution headers.
    OpenRouter,
    /// Ollama native `/api/chat`.
    Ollama,
}

impl Provider {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::DeepSeek => "https://api.deepseek.com",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Ollama => "http://localhost:11434/api",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek-chat",
            Self::OpenRouter => "deepseek/deepseek-chat",
            Self::Ollama => "llama2",
        }
    }

    /// Hosted providers refuse to start without a key.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::DeepSeek => "deepseek",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
        })
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    pub backend: BackendConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let backend = &self.backend;

        anyhow::ensure!(self.server.port != 0, "[server] port must be non-zero");
        anyhow::ensure!(backend.timeout_ms > 0, "[backend] timeout_ms must be positive");

        let endpoint = backend.endpoint();
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "[backend] endpoint `{endpoint}` must be an http(s) URL"
        );

        if backend.provider.requires_api_key() {
            anyhow::ensure!(
                backend.api_key_env.as_deref().is_some_and(|v| !v.is_empty()),
                "provider `{}` requires `api_key_env`",
                backend.provider
            );
        }

        anyhow::ensure!(
            !backend.default_model().is_empty(),
            "[backend] default_model must not be empty"
        );
        for (alias, target) in &backend.models {
            anyhow::ensure!(
                !alias.is_empty() && !target.is_empty(),
                "[backend.models] entry `{alias}` = `{target}` must have both sides non-empty"
            );
        }

        Ok(())
    }
}

/// Listener and logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port for the OpenAI-compatible API (default: 9000).
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Log output format (default: human-readable text).
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// The single upstream provider this relay fronts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub provider: Provider,

    /// Base URL. Defaults per provider; see [`Provider::default_endpoint`].
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable name whose value is the provider API key.
    ///
    /// The same key authenticates callers of this relay. Leave unset for a
    /// keyless local Ollama, which then accepts every caller.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Model sent upstream when the requested one has no mapping.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Request timeout for non-streaming calls in milliseconds (default: 30 000).
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Public model name → provider model name.
    #[serde(default)]
    pub models: HashMap<String, String>,

    /// `HTTP-Referer` sent to OpenRouter for attribution.
    #[serde(default)]
    pub referer: Option<String>,
}

impl BackendConfig {
    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .unwrap_or(self.provider.default_endpoint())
    }

    pub fn default_model(&self) -> &str {
        self.default_model
            .as_deref()
            .unwrap_or(self.provider.default_model())
    }
}

/// Listener port when neither the config file nor `LLM_RELAY_PORT` sets one.
pub const DEFAULT_PORT: u16 = 9000;

mod defaults {
    pub fn port() -> u16 { super::DEFAULT_PORT }
    pub fn timeout_ms() -> u64 { 30_000 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Config {
        toml::from_str(toml_src).expect("config should parse")
    }

    // -----------------------------------------------------------------------
    // Parsing & validation
    // -----------------------------------------------------------------------

    #[test]
    fn parse_example_config() {
        let content = include_str!("../config.example.toml");
        let config: Config = toml::from_str(content).expect("example config should parse");
        config.validate().expect("example config should be valid");
        assert_eq!(config.backend.models["gpt-4o"], "deepseek-chat");
    }

    #[test]
    fn defaults_are_applied_when_sections_are_minimal() {
        let config = parse(
            r#"
            [backend]
            provider = "ollama"
            "#,
        );
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.log_format, LogFormat::Text);
        assert_eq!(config.backend.timeout_ms, 30_000);
        assert_eq!(config.backend.endpoint(), "http://localhost:11434/api");
        assert_eq!(config.backend.default_model(), "llama2");
        config.validate().expect("keyless ollama is valid");
    }

    #[test]
    fn provider_defaults() {
        assert_eq!(Provider::DeepSeek.default_endpoint(), "https://api.deepseek.com");
        assert_eq!(Provider::OpenRouter.default_model(), "deepseek/deepseek-chat");
        assert!(Provider::OpenRouter.requires_api_key());
        assert!(!Provider::Ollama.requires_api_key());
    }

    #[test]
    fn provider_deserializes_from_lowercase() {
        let config = parse("[backend]\nprovider = \"openrouter\"\napi_key_env = \"K\"");
        assert_eq!(config.backend.provider, Provider::OpenRouter);
        assert_eq!(config.backend.provider.to_string(), "openrouter");
    }

    #[test]
    fn validation_rejects_hosted_provider_without_key_env() {
        let config = parse("[backend]\nprovider = \"deepseek\"");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_non_http_endpoint() {
        let config = parse(
            r#"
            [backend]
            provider = "ollama"
            endpoint = "localhost:11434"
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_empty_model_mapping() {
        let config = parse(
            r#"
            [backend]
            provider = "ollama"
            [backend.models]
            "gpt-4o" = ""
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_timeout() {
        let config = parse("[backend]\nprovider = \"ollama\"\ntimeout_ms = 0");
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_log_format_parses() {
        let config = parse("[server]\nlog_format = \"json\"\n[backend]\nprovider = \"ollama\"");
        assert_eq!(config.server.log_format, LogFormat::Json);
    }

    // -----------------------------------------------------------------------
    // API key resolution
    // -----------------------------------------------------------------------

    #[test]
    fn api_key_resolves_from_env_var() {
        let var = "LLM_RELAY_CONFIG_TEST_KEY_RESOLVE_1";
        std::env::set_var(var, "sk-test-resolved");
        let config = parse(&format!("[backend]\nprovider = \"deepseek\"\napi_key_env = \"{var}\""));
        assert_eq!(config.backend.api_key().as_deref(), Some("sk-test-resolved"));
        std::env::remove_var(var);
    }

    #[test]
    fn api_key_is_none_when_env_var_unset_or_empty() {
        let var = "LLM_RELAY_CONFIG_TEST_KEY_EMPTY_2";
        std::env::set_var(var, "");
        let config = parse(&format!("[backend]\nprovider = \"ollama\"\napi_key_env = \"{var}\""));
        assert!(config.backend.api_key().is_none());
        std::env::remove_var(var);

        let config = parse("[backend]\nprovider = \"ollama\"\napi_key_env = \"LLM_RELAY_NOT_SET_XYZ_99\"");
        assert!(config.backend.api_key().is_none());
    }
}
