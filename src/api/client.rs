//! Client-facing routes.
//!
//! Thin on purpose: handlers parse the request, own the per-request
//! cancellation token and hand everything else to the configured
//! [`Backend`](crate::backends::Backend).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{client_auth::client_auth_middleware, AppState};
use crate::error::RelayError;
use crate::wire::openai::{ChatCompletionRequest, ModelList};

/// Authenticated OpenAI routes plus the open `/healthz` probe.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            client_auth_middleware,
        ))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// `POST /v1/chat/completions`
///
/// The body is parsed here rather than through the `Json` extractor so every
/// malformed request gets the same OpenAI-shaped 400.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, RelayError> {
    let request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| RelayError::BadRequest(format!("invalid chat completion request: {e}")))?;
    debug!(
        model = %request.model,
        stream = request.stream,
        messages = request.messages.len(),
        "chat completion request"
    );

    // Dropping this handler before it returns (caller hung up) cancels the
    // upstream call. Once a response exists, a streaming body owns its own
    // child token and cancels it when dropped.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let response = state.backend.handle_chat_completion(cancel, request).await;
    guard.disarm();
    Ok(response)
}

/// `GET /v1/models`
pub async fn list_models(State(state): State<Arc<AppState>>) -> Result<Json<ModelList>, RelayError> {
    let models = state
        .backend
        .list_models()
        .await
        .map_err(|e| RelayError::internal("list models", e))?;
    Ok(Json(ModelList::new(models)))
}

/// `GET /healthz`: always 200, never touches the backend.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
