//! Unified error type for the relay's request path.
//!
//! [`RelayError`] converts into an OpenAI-shaped HTTP response via
//! [`IntoResponse`], so handlers and backend adapters return
//! `Result<_, RelayError>` and propagate with `?`.
//!
//! Upstream error replies are the one exception to the envelope: their status,
//! headers and body go back to the caller verbatim, because provider error
//! bodies are already OpenAI-shaped and carry details callers rely on.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;

use crate::wire::openai::ErrorBody;

/// Non-standard "client closed request" status, logged when the caller hangs up.
const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed request body.
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid API key")]
    InvalidApiKey,

    /// Provider answered with status >= 400. Forwarded as-is.
    #[error("upstream returned HTTP {status}")]
    Upstream {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },

    /// Connection, TLS or timeout failure talking to the provider.
    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// Local failure; `stage` names the step for the logs.
    #[error("{stage} failed: {source}")]
    Internal {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The caller went away before the upstream answered.
    #[error("request cancelled by client")]
    Cancelled,
}

impl RelayError {
    pub fn internal(stage: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            stage,
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::MissingApiKey => StatusCode::UNAUTHORIZED,
            Self::InvalidApiKey => StatusCode::FORBIDDEN,
            Self::Upstream { status, .. } => *status,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Cancelled => {
                StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST)
            }
        }
    }

    fn envelope(&self) -> ErrorBody {
        match self {
            Self::BadRequest(reason) => ErrorBody::new(reason.clone(), "invalid_request_error"),
            Self::MissingApiKey => ErrorBody::new("Missing API key", "authentication_error"),
            Self::InvalidApiKey => ErrorBody::new("Invalid API key", "authentication_error"),
            // Local failure detail stays in the logs.
            Self::Transport(_) => ErrorBody::new("upstream request failed", "upstream_error"),
            Self::Internal { .. } => ErrorBody::new("internal error", "internal_error"),
            Self::Cancelled => ErrorBody::new("request cancelled", "cancelled"),
            Self::Upstream { status, .. } => {
                ErrorBody::new(format!("upstream returned HTTP {status}"), "upstream_error")
            }
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Upstream {
                status,
                mut headers,
                body,
            } => {
                tracing::info!(%status, bytes = body.len(), "forwarding upstream error");
                headers
                    .entry(header::CONTENT_TYPE)
                    .or_insert(HeaderValue::from_static("application/json"));
                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                return response;
            }
            Self::Transport(ref e) => {
                tracing::error!(error = %e, timeout = e.is_timeout(), "upstream transport failure");
            }
            Self::Internal { stage, ref source } => {
                tracing::error!(stage, error = %source, "relay failure");
            }
            Self::Cancelled => tracing::debug!("client went away before upstream answered"),
            Self::BadRequest(ref reason) => tracing::warn!(%reason, "rejecting request"),
            Self::MissingApiKey | Self::InvalidApiKey => {
                tracing::warn!(error = %self, "rejecting request");
            }
        }

        let mut response = (status, Json(self.envelope())).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"llm-relay\""),
            );
        }
        response
    }
}
