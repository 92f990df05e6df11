//! Non-streaming response path: read the whole upstream body, decode it,
//! translate it to the OpenAI schema, and answer in one piece.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::decompress;
use crate::error::RelayError;
use crate::wire::openai::ChatCompletionResponse;

/// Relay a successful upstream reply, mirroring its status code.
pub async fn respond<T, F>(upstream: reqwest::Response, translate: F) -> Result<Response, RelayError>
where
    T: DeserializeOwned,
    F: FnOnce(T) -> ChatCompletionResponse,
{
    let status = upstream.status();
    let encoding = upstream
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let raw = upstream.bytes().await.map_err(RelayError::Transport)?;

    let body = render(encoding.as_deref(), &raw, translate)?;
    Ok(json_response(status, body))
}

/// Decode, parse and translate an upstream body into OpenAI JSON bytes.
///
/// Deterministic for a deterministic `translate`.
pub fn render<T, F>(encoding: Option<&str>, raw: &[u8], translate: F) -> Result<Bytes, RelayError>
where
    T: DeserializeOwned,
    F: FnOnce(T) -> ChatCompletionResponse,
{
    let decoded = decompress::decode_body(encoding, raw)
        .map_err(|e| RelayError::internal("decompress upstream response", e))?;
    let parsed: T = serde_json::from_slice(&decoded)
        .map_err(|e| RelayError::internal("parse upstream response", e))?;
    let encoded = serde_json::to_vec(&translate(parsed))
        .map_err(|e| RelayError::internal("encode response", e))?;
    Ok(Bytes::from(encoded))
}

fn json_response(status: StatusCode, body: Bytes) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
