//! Caller API key authentication middleware.
//!
//! Every authenticated route expects `Authorization: Bearer <key>`, checked
//! against the backend's key policy with a constant-time compare. A missing
//! header is a 401; a key that does not match is a 403. Under the allow-all
//! policy (Ollama without a key) every request passes, header or not.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::AppState;
use crate::error::RelayError;

pub async fn client_auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, RelayError> {
    match bearer_token(req.headers()) {
        None if state.backend.validate_api_key("") => {}
        None => return Err(RelayError::MissingApiKey),
        Some(key) if state.backend.validate_api_key(key) => {}
        Some(_) => {
            debug!("caller presented a non-matching API key");
            return Err(RelayError::InvalidApiKey);
        }
    }
    Ok(next.run(req).await)
}

/// Token from the `Authorization` header, `Bearer ` prefix stripped.
///
/// An absent or blank header is `None`. A value without the prefix is taken
/// whole, so it fails the compare instead of reading as missing.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim_start();
    // The scheme must be checked before trimming the end, or "Bearer " would
    // collapse to "Bearer" and be compared as a key.
    let token = match value.strip_prefix("Bearer") {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
        _ => value.trim_end(),
    };
    (!token.is_empty()).then_some(token)
}
