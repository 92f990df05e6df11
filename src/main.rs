use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod backends;
mod config;
mod convert;
mod decompress;
mod error;
mod stamp;
mod stream;
mod unary;
mod wire;

use config::{Config, LogFormat};
use stamp::SystemStamper;

const DEFAULT_CONFIG_PATH: &str = "/etc/llm-relay/config.toml";
const DEFAULT_LOG_FILTER: &str = "llm_relay=info,tower_http=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Docker HEALTHCHECK entry point: probe /healthz and exit, no curl needed in the image.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    let config_path = std::env::var("LLM_RELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    init_tracing(config.server.log_format);

    info!(
        port = config.server.port,
        provider = %config.backend.provider,
        endpoint = config.backend.endpoint(),
        "llm-relay starting"
    );

    let backend = backends::build(&config.backend, Arc::new(SystemStamper))
        .context("failed to initialise backend")?;
    let app = api::app(api::AppState::new(backend));

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down cleanly");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

/// Resolves on Ctrl-C or SIGTERM. A handler that cannot be installed is
/// logged and never fires; the other one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// GET /healthz on `LLM_RELAY_PORT` and exit 0 on 200, 1 otherwise.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("LLM_RELAY_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(config::DEFAULT_PORT);

    let url = format!("http://127.0.0.1:{port}/healthz");
    let healthy = match reqwest::get(&url).await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    };
    std::process::exit(if healthy { 0 } else { 1 });
}
