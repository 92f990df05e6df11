//! Streaming response path: relay provider output to the caller as
//! Server-Sent Events.
//!
//! The relay reads the upstream body line by line, lets a provider-specific
//! [`ChunkTranslator`] turn each line into an OpenAI chunk, and writes one
//! `data: {json}\n\n` event per chunk into a bounded channel that backs the
//! axum response body. A heartbeat task interleaves `: heartbeat` comments so
//! intermediaries keep idle connections open.
//!
//! ## Shutdown
//!
//! Everything runs under one [`CancellationToken`] scope, a child of the
//! request token. The scope ends when any of these happen:
//!
//! * the translator reports the final chunk or `[DONE]`
//! * the upstream body ends or fails
//! * the caller disconnects (the response body is dropped, which drops its
//!   guard, or the channel receiver closes)
//! * the parent token is cancelled
//!
//! On exit the relay cancels the scope, waits for the heartbeat task, and only
//! then writes the terminal `data: [DONE]` event, so no frame ever follows it.

use std::convert::Infallible;
use std::io;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue},
    response::Response,
};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument, Span};

use crate::wire::openai::ChatCompletionChunk;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const HEARTBEAT_FRAME: &[u8] = b": heartbeat\n\n";
const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";
const RELAY_BUFFER: usize = 32;
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// What one upstream line means for the caller.
#[derive(Debug)]
pub enum Step {
    /// Nothing to forward (keep-alive, unparseable line, empty delta).
    Skip,
    Chunk(ChatCompletionChunk),
    /// The chunk carrying the finish reason. Nothing is read after it.
    Final(ChatCompletionChunk),
    /// Provider error object, forwarded as one event before closing.
    Error(Value),
    /// Upstream sent its own end-of-stream marker.
    Done,
}

/// Provider-specific line decoder. Holds per-stream state such as the
/// response id every chunk must carry.
pub trait ChunkTranslator: Send + 'static {
    fn translate(&mut self, line: &str) -> Step;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    UpstreamEof,
    Finished,
    Cancelled,
    ClientGone,
    ReadError,
    /// Provider sent an error object; it was forwarded as the last event.
    UpstreamError,
}

/// Build the SSE response for a successful upstream reply.
pub fn respond<T: ChunkTranslator>(
    upstream: reqwest::Response,
    translator: T,
    cancel: &CancellationToken,
) -> Response {
    let status = upstream.status();
    let body = relay_body(
        upstream.bytes_stream(),
        translator,
        cancel.child_token(),
        HEARTBEAT_INTERVAL,
    );

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    response
}

/// Spawn the relay under `scope` and return a body that streams its frames.
///
/// Dropping the body cancels `scope`.
pub(crate) fn relay_body<S, E, T>(
    upstream: S,
    translator: T,
    scope: CancellationToken,
    heartbeat: Duration,
) -> Body
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    T: ChunkTranslator,
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(RELAY_BUFFER);

    tokio::spawn(run(upstream, translator, tx, scope.clone(), heartbeat).instrument(Span::current()));

    let guard = scope.drop_guard();
    let frames = futures_util::stream::poll_fn(move |cx| {
        let _scope = &guard;
        rx.poll_recv(cx).map(|frame| frame.map(Ok::<_, Infallible>))
    });
    Body::from_stream(frames)
}

/// Drive one relay to completion.
pub(crate) async fn run<S, E, T>(
    upstream: S,
    mut translator: T,
    tx: mpsc::Sender<Bytes>,
    scope: CancellationToken,
    heartbeat: Duration,
) -> CloseReason
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
    T: ChunkTranslator,
{
    let beat = tokio::spawn(heartbeat_loop(tx.clone(), scope.clone(), heartbeat));

    let reason = read_loop(upstream, &mut translator, &tx, &scope).await;

    scope.cancel();
    if let Err(e) = beat.await {
        warn!(error = %e, "heartbeat task failed");
    }
    if matches!(reason, CloseReason::UpstreamEof | CloseReason::Finished) {
        // Receiver may already be gone; nothing left to tell it.
        let _ = tx.send(Bytes::from_static(DONE_FRAME)).await;
    }

    debug!(?reason, "stream relay closed");
    reason
}

async fn read_loop<S, E, T>(
    upstream: S,
    translator: &mut T,
    tx: &mpsc::Sender<Bytes>,
    scope: &CancellationToken,
) -> CloseReason
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
    T: ChunkTranslator,
{
    let reader = StreamReader::new(upstream.map_err(io::Error::other));
    let mut lines = std::pin::pin!(FramedRead::new(
        reader,
        LinesCodec::new_with_max_length(MAX_LINE_BYTES)
    ));

    loop {
        let next = tokio::select! {
            biased;
            () = scope.cancelled() => return CloseReason::Cancelled,
            () = tx.closed() => return CloseReason::ClientGone,
            next = lines.next() => next,
        };

        let line = match next {
            None => return CloseReason::UpstreamEof,
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(error = %e, "upstream stream read failed");
                return CloseReason::ReadError;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let (frame, close) = match translator.translate(&line) {
            Step::Skip => continue,
            Step::Done => return CloseReason::Finished,
            Step::Chunk(chunk) => (event(&chunk), None),
            Step::Final(chunk) => (event(&chunk), Some(CloseReason::Finished)),
            Step::Error(err) => {
                warn!(error = %err, "upstream reported an error mid-stream");
                (event(&err), Some(CloseReason::UpstreamError))
            }
        };

        if let Some(frame) = frame {
            let sent = tokio::select! {
                biased;
                () = scope.cancelled() => return CloseReason::Cancelled,
                sent = tx.send(frame) => sent,
            };
            if sent.is_err() {
                return CloseReason::ClientGone;
            }
        }
        if let Some(reason) = close {
            return reason;
        }
    }
}

async fn heartbeat_loop(tx: mpsc::Sender<Bytes>, scope: CancellationToken, every: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = scope.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let sent = tokio::select! {
            biased;
            () = scope.cancelled() => return,
            sent = tx.send(Bytes::from_static(HEARTBEAT_FRAME)) => sent,
        };
        if sent.is_err() {
            debug!("heartbeat write failed, ending relay");
            scope.cancel();
            return;
        }
    }
}

/// Encode one SSE `data:` event.
fn event<T: Serialize>(payload: &T) -> Option<Bytes> {
    match serde_json::to_vec(payload) {
        Ok(json) => {
            let mut frame = Vec::with_capacity(json.len() + 8);
            frame.extend_from_slice(b"data: ");
            frame.extend_from_slice(&json);
            frame.extend_from_slice(b"\n\n");
            Some(Bytes::from(frame))
        }
        Err(e) => {
            error!(stage = "encode stream chunk", error = %e, "dropping chunk");
            None
        }
    }
}

/// Strip the SSE `data:` prefix. Returns `None` for comments and other
/// SSE fields (`event:`, `id:`, `retry:`).
pub(crate) fn sse_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("data:") {
        return Some(rest.trim_start());
    }
    if line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
    {
        return None;
    }
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::openai::{ChunkChoice, Delta, CHAT_COMPLETION_CHUNK_OBJECT};
    use futures_util::stream;

    /// Emits one chunk per line; `end` finishes, `[DONE]` terminates, `skip` is ignored.
    struct Echo;

    impl ChunkTranslator for Echo {
        fn translate(&mut self, line: &str) -> Step {
            let Some(payload) = sse_payload(line) else {
                return Step::Skip;
            };
            let chunk = |text: &str, finish: Option<&str>| ChatCompletionChunk {
                id: "chatcmpl-test".into(),
                object: CHAT_COMPLETION_CHUNK_OBJECT,
                created: 0,
                model: "gpt-4o".into(),
                choices: vec![ChunkChoice {
                    index: 0,
                    delta: Delta {
                        content: Some(text.into()),
                        ..Delta::default()
                    },
                    finish_reason: finish.map(str::to_owned),
                }],
                usage: None,
            };
            match payload {
                "[DONE]" => Step::Done,
                "skip" => Step::Skip,
                "end" => Step::Final(chunk("", Some("stop"))),
                "boom" => Step::Error(serde_json::json!({"error": {"message": "boom"}})),
                text => Step::Chunk(chunk(text, None)),
            }
        }
    }

    fn lines(body: &'static str) -> impl Stream<Item = Result<Bytes, io::Error>> + Send {
        stream::iter(vec![Ok(Bytes::from_static(body.as_bytes()))])
    }

    async fn drain(mut rx: mpsc::Receiver<Bytes>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(frame) = rx.recv().await {
            out.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        out
    }

    async fn relay(
        upstream: impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
        heartbeat: Duration,
    ) -> (CloseReason, Vec<String>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(run(upstream, Echo, tx, CancellationToken::new(), heartbeat));
        let frames = drain(rx).await;
        (handle.await.unwrap(), frames)
    }

    // -----------------------------------------------------------------------
    // Framing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn each_chunk_becomes_one_data_event_then_done() {
        let (reason, frames) = relay(lines("data: a\n\ndata: b\n"), HEARTBEAT_INTERVAL).await;

        assert_eq!(reason, CloseReason::UpstreamEof);
        assert_eq!(frames.len(), 3);
        assert!(frames[0].starts_with("data: {") && frames[0].ends_with("}\n\n"));
        assert!(frames[0].contains(r#""content":"a""#));
        assert!(frames[1].contains(r#""content":"b""#));
        assert_eq!(frames[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn blank_comment_and_skipped_lines_produce_nothing() {
        let (_, frames) = relay(
            lines("\n\r\n: keep-alive\nevent: ping\ndata: skip\ndata: a\n"),
            HEARTBEAT_INTERVAL,
        )
        .await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains(r#""content":"a""#));
    }

    #[tokio::test]
    async fn crlf_line_endings_are_accepted() {
        let (_, frames) = relay(lines("data: a\r\n\r\n"), HEARTBEAT_INTERVAL).await;
        assert!(frames[0].contains(r#""content":"a""#));
    }

    #[tokio::test]
    async fn final_chunk_stops_reading_even_if_upstream_stays_open() {
        let upstream = lines("data: a\ndata: end\ndata: never\n").chain(stream::pending());
        let (reason, frames) = relay(upstream, HEARTBEAT_INTERVAL).await;

        assert_eq!(reason, CloseReason::Finished);
        assert_eq!(frames.len(), 3);
        assert!(frames[1].contains(r#""finish_reason":"stop""#));
        assert_eq!(frames[2], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn upstream_done_marker_is_not_duplicated() {
        let (reason, frames) = relay(lines("data: a\ndata: [DONE]\n"), HEARTBEAT_INTERVAL).await;
        assert_eq!(reason, CloseReason::Finished);
        assert_eq!(frames.iter().filter(|f| f.contains("[DONE]")).count(), 1);
    }

    #[tokio::test]
    async fn provider_error_is_forwarded_then_stream_closes() {
        let (reason, frames) = relay(lines("data: boom\ndata: a\n"), HEARTBEAT_INTERVAL).await;
        assert_eq!(reason, CloseReason::UpstreamError);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains(r#""message":"boom""#));
    }

    #[tokio::test]
    async fn read_error_ends_without_done() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let (reason, frames) = relay(upstream, HEARTBEAT_INTERVAL).await;
        assert_eq!(reason, CloseReason::ReadError);
        assert!(!frames.iter().any(|f| f.contains("[DONE]")));
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn idle_upstream_gets_heartbeats() {
        let (tx, mut rx) = mpsc::channel(64);
        let scope = CancellationToken::new();
        let upstream = stream::pending::<Result<Bytes, io::Error>>();
        let handle = tokio::spawn(run(upstream, Echo, tx, scope.clone(), Duration::from_millis(10)));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("heartbeat within timeout")
            .unwrap();
        assert_eq!(&first[..], HEARTBEAT_FRAME);

        scope.cancel();
        assert_eq!(handle.await.unwrap(), CloseReason::Cancelled);
    }

    #[tokio::test]
    async fn nothing_follows_done() {
        let upstream = lines("data: a\n");
        let (tx, rx) = mpsc::channel(64);
        let reason = run(upstream, Echo, tx, CancellationToken::new(), Duration::from_millis(1)).await;
        assert_eq!(reason, CloseReason::UpstreamEof);

        let frames = drain(rx).await;
        assert_eq!(frames.last().map(String::as_str), Some("data: [DONE]\n\n"));
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn client_disconnect_stops_relay_promptly() {
        let (tx, rx) = mpsc::channel(64);
        let upstream = stream::pending::<Result<Bytes, io::Error>>();
        let handle = tokio::spawn(run(
            upstream,
            Echo,
            tx,
            CancellationToken::new(),
            Duration::from_millis(50),
        ));
        drop(rx);

        let reason = tokio::time::timeout(Duration::from_millis(50), handle)
            .await
            .expect("relay should stop within one heartbeat interval")
            .unwrap();
        assert_eq!(reason, CloseReason::ClientGone);
    }

    #[tokio::test]
    async fn cancelled_scope_writes_no_done() {
        let (tx, rx) = mpsc::channel(64);
        let scope = CancellationToken::new();
        scope.cancel();
        let reason = run(
            stream::pending::<Result<Bytes, io::Error>>(),
            Echo,
            tx,
            scope,
            HEARTBEAT_INTERVAL,
        )
        .await;
        assert_eq!(reason, CloseReason::Cancelled);
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn dropping_the_body_cancels_the_relay() {
        let parent = CancellationToken::new();
        let scope = parent.child_token();
        let body = relay_body(
            stream::pending::<Result<Bytes, io::Error>>(),
            Echo,
            scope.clone(),
            HEARTBEAT_INTERVAL,
        );
        assert!(!scope.is_cancelled());

        drop(body);
        assert!(scope.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_the_relay() {
        let parent = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(run(
            stream::pending::<Result<Bytes, io::Error>>(),
            Echo,
            tx,
            parent.child_token(),
            HEARTBEAT_INTERVAL,
        ));
        parent.cancel();
        assert_eq!(handle.await.unwrap(), CloseReason::Cancelled);
        drop(rx);
    }

    // -----------------------------------------------------------------------
    // sse_payload
    // -----------------------------------------------------------------------

    #[test]
    fn sse_payload_strips_prefix_and_ignores_fields() {
        assert_eq!(sse_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_payload("data:{\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(sse_payload(": OPENROUTER PROCESSING"), None);
        assert_eq!(sse_payload("event: message"), None);
        assert_eq!(sse_payload("{\"raw\":true}"), Some("{\"raw\":true}"));
    }
}
