//! HTTP transport to a single provider.
//!
//! Holds two [`reqwest::Client`]s: a buffered one that honours the configured
//! timeout, and a streaming one with only a connect timeout so long SSE
//! responses are never cut off mid-stream. Both carry the provider's static
//! headers (auth, attribution) as defaults.

use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Client, Response,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::decompress;
use crate::error::RelayError;

/// Headers that describe a single hop and must not be copied onto our response.
///
/// `content-length` and `content-encoding` are included because the body is
/// re-framed, and decoded when possible.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "content-encoding",
];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const UNARY_ACCEPT_ENCODING: &str = "gzip, deflate, br";

pub struct Upstream {
    client: Client,
    stream_client: Client,
    base_url: String,
}

impl Upstream {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        mut headers: HeaderMap,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        if let Some(key) = api_key {
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}"))
                    .context("invalid API key value for Authorization header")?,
            );
        }

        // reqwest's built-in decompression stays off; bodies are decoded by
        // `decompress` so the encoding is visible to the relay.
        let client = Client::builder()
            .default_headers(headers.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .context("building reqwest client")?;

        let stream_client = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("building streaming reqwest client")?;

        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST `body` as JSON to `{base_url}{path}`.
    ///
    /// Resolves once response headers arrive. Status >= 400 becomes
    /// [`RelayError::Upstream`] carrying the (decoded) provider body.
    /// Cancelling `cancel` aborts the in-flight request.
    pub async fn post_json<T: Serialize>(
        &self,
        path: &str,
        body: &T,
        stream: bool,
        cancel: &CancellationToken,
    ) -> Result<Response, RelayError> {
        let url = format!("{}{path}", self.base_url);
        let payload =
            serde_json::to_vec(body).map_err(|e| RelayError::internal("encode upstream request", e))?;

        let (client, accept, accept_encoding) = if stream {
            (&self.stream_client, "text/event-stream", "identity")
        } else {
            (&self.client, "application/json", UNARY_ACCEPT_ENCODING)
        };

        debug!(%url, stream, bytes = payload.len(), "forwarding to upstream");

        let send = client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, accept)
            .header(header::ACCEPT_ENCODING, accept_encoding)
            .body(payload)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RelayError::Cancelled),
            result = send => result.map_err(RelayError::Transport)?,
        };

        let status = response.status();
        debug!(%status, "upstream responded");
        if status.is_client_error() || status.is_server_error() {
            return Err(upstream_error(response).await);
        }
        Ok(response)
    }
}

/// Capture an error reply so it can be forwarded to the caller verbatim.
async fn upstream_error(response: Response) -> RelayError {
    let status = response.status();
    let encoding = response
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let mut headers = forwardable_headers(response.headers());

    let raw = match response.bytes().await {
        Ok(raw) => raw,
        Err(e) => return RelayError::Transport(e),
    };

    let decoded = decompress::decode_body(encoding.as_deref(), &raw)
        .map(|decoded| Bytes::from(decoded.into_owned()));
    let body = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(error = %e, "could not decode upstream error body, forwarding raw bytes");
            if let Some(value) = encoding.and_then(|v| HeaderValue::from_str(&v).ok()) {
                headers.insert(header::CONTENT_ENCODING, value);
            }
            raw
        }
    };

    RelayError::Upstream {
        status,
        headers,
        body,
    }
}

/// Copy `headers`, dropping hop-by-hop entries.
pub(crate) fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| name.as_str().eq_ignore_ascii_case(h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upstream_for(server: &MockServer) -> Upstream {
        Upstream::new(&server.uri(), Some("sk-up"), HeaderMap::new(), Duration::from_secs(5)).unwrap()
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn trailing_slash_is_trimmed() {
        let up = Upstream::new("http://localhost:11434/api/", None, HeaderMap::new(), Duration::from_secs(1))
            .unwrap();
        assert_eq!(up.base_url, "http://localhost:11434/api");
    }

    #[test]
    fn rejects_api_key_with_control_characters() {
        let res = Upstream::new("http://x", Some("bad\nkey"), HeaderMap::new(), Duration::from_secs(1));
        assert!(res.is_err());
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        let out = forwardable_headers(&headers);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("x-ratelimit-remaining"));
    }

    // -----------------------------------------------------------------------
    // post_json
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn sends_bearer_key_and_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header_eq("authorization", "Bearer sk-up"))
            .and(body_partial_json(json!({"model": "deepseek-chat"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let resp = upstream_for(&server)
            .post_json(
                "/chat/completions",
                &json!({"model": "deepseek-chat"}),
                false,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        // wiremock splits header values on commas, so the full list is checked here.
        let received = server.received_requests().await.unwrap();
        assert_eq!(
            received[0].headers["accept-encoding"].to_str().unwrap(),
            UNARY_ACCEPT_ENCODING
        );
    }

    #[tokio::test]
    async fn error_status_is_captured_with_decoded_body() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(br#"{"error":{"message":"slow down"}}"#).unwrap();
        let gz = enc.finish().unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("content-encoding", "gzip")
                    .insert_header("retry-after", "3")
                    .set_body_bytes(gz),
            )
            .mount(&server)
            .await;

        let err = upstream_for(&server)
            .post_json("/chat/completions", &json!({}), false, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            RelayError::Upstream { status, headers, body } => {
                assert_eq!(status.as_u16(), 429);
                assert_eq!(headers["retry-after"], "3");
                assert!(!headers.contains_key(header::CONTENT_ENCODING));
                assert_eq!(&body[..], br#"{"error":{"message":"slow down"}}"#);
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = upstream_for(&server)
            .post_json("/chat/completions", &json!({}), false, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Cancelled));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        let up = Upstream::new("http://127.0.0.1:1", None, HeaderMap::new(), Duration::from_secs(2)).unwrap();
        let err = up
            .post_json("/chat", &json!({}), false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }
}
