//! `message/stream` replies: Server-Sent Events carrying one JSON-RPC
//! response envelope per `data:` payload.
//!
//! [`TextStream`] turns such a reply into a lazy, finite sequence of text
//! increments. It is consumed once; dropping it closes the connection.

use crate::a2a::codec::{self, ResponseBody, ResponseEvent};
use crate::a2a::normalizer::{StreamAccumulator, StreamStep};
use crate::error::DelegationError;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};

/// Incremental SSE frame splitter.
///
/// Buffers raw bytes so a multi-byte character split across chunks is
/// decoded only once its frame is complete.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the `data` payload of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, DelegationError> {
        // CRLF line endings reduce to LF; JSON payloads never carry a raw CR.
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame = self.buffer.split_to(pos + 2);
            if let Some(data) = frame_data(utf8_frame(&frame[..pos])?) {
                payloads.push(data);
            }
        }
        Ok(payloads)
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Result<Option<String>, DelegationError> {
        let frame = self.buffer.split();
        Ok(frame_data(utf8_frame(&frame)?.trim_end_matches('\n')))
    }
}

fn utf8_frame(frame: &[u8]) -> Result<&str, DelegationError> {
    std::str::from_utf8(frame)
        .map_err(|e| DelegationError::Protocol(format!("event stream is not valid UTF-8: {}", e)))
}

/// Joined `data:` lines of one frame; comment-only or empty frames yield None.
fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();
    if lines.is_empty() {
        return None;
    }
    let data = lines.join("\n");
    if data.trim().is_empty() || data.trim() == "[DONE]" {
        None
    } else {
        Some(data)
    }
}

/// Decode one SSE payload into an event.
pub fn decode_payload(payload: &str) -> Result<ResponseEvent, DelegationError> {
    let decoded = codec::decode_response(payload.as_bytes())?;
    match decoded.body {
        ResponseBody::Result(event) => Ok(event),
        ResponseBody::Error(err) => Err(DelegationError::Remote {
            code: err.code,
            message: err.message,
        }),
    }
}

/// Turn a raw byte stream into a stream of decoded events.
pub fn events<S, E>(bytes: S) -> impl Stream<Item = Result<ResponseEvent, DelegationError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send,
{
    struct State<S> {
        bytes: S,
        decoder: SseDecoder,
        pending: VecDeque<String>,
        exhausted: bool,
    }

    let state = State {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(payload) = st.pending.pop_front() {
                return Some((decode_payload(&payload), st));
            }
            if st.exhausted {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => match st.decoder.push(&chunk) {
                    Ok(payloads) => st.pending.extend(payloads),
                    Err(e) => {
                        st.exhausted = true;
                        return Some((Err(e), st));
                    }
                },
                Some(Err(e)) => {
                    st.exhausted = true;
                    let err = DelegationError::Transport {
                        message: format!("stream interrupted: {}", e),
                        retryable: false,
                    };
                    return Some((Err(err), st));
                }
                None => {
                    st.exhausted = true;
                    match st.decoder.finish() {
                        Ok(payload) => st.pending.extend(payload),
                        Err(e) => return Some((Err(e), st)),
                    }
                }
            }
        }
    })
}

/// Lazy sequence of text increments from a streamed reply.
///
/// Ends after the remote signals completion or after the first error. A
/// connection that closes before completion yields a transport error. Not
/// restartable.
pub struct TextStream {
    inner: BoxStream<'static, Result<ResponseEvent, DelegationError>>,
    accumulator: StreamAccumulator,
    deadline: Option<(Pin<Box<Sleep>>, Duration)>,
    done: bool,
}

impl TextStream {
    pub fn new(
        events: impl Stream<Item = Result<ResponseEvent, DelegationError>> + Send + 'static,
    ) -> Self {
        Self {
            inner: events.boxed(),
            accumulator: StreamAccumulator::new(),
            deadline: None,
            done: false,
        }
    }

    /// End with [`DelegationError::Timeout`] if still open at `deadline`.
    pub fn with_deadline(mut self, deadline: Instant, limit: Duration) -> Self {
        self.deadline = Some((Box::pin(tokio::time::sleep_until(deadline)), limit));
        self
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        Self::new(events(Box::pin(response.bytes_stream())))
    }

    /// Text emitted so far.
    pub fn text_so_far(&self) -> &str {
        self.accumulator.text()
    }

    /// Drain the rest of the stream into one string.
    pub async fn collect_text(mut self) -> Result<String, DelegationError> {
        while let Some(step) = self.next().await {
            step?;
        }
        Ok(self.accumulator.into_text())
    }
}

impl Stream for TextStream {
    type Item = Result<String, DelegationError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }
            if let Some((sleep, limit)) = self.deadline.as_mut() {
                if sleep.as_mut().poll(cx).is_ready() {
                    let limit = *limit;
                    self.done = true;
                    self.inner = futures::stream::empty().boxed();
                    return Poll::Ready(Some(Err(DelegationError::Timeout(limit))));
                }
            }
            let event = match self.inner.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    // Completion always sets `done` first, so this is a cut-off stream.
                    self.done = true;
                    return Poll::Ready(Some(Err(DelegationError::Transport {
                        message: "stream ended before completion".to_string(),
                        retryable: false,
                    })));
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(event))) => event,
            };

            match self.accumulator.step(&event) {
                StreamStep::Continue(None) => continue,
                StreamStep::Continue(Some(text)) => return Poll::Ready(Some(Ok(text))),
                StreamStep::Finish(text) => {
                    self.done = true;
                    // Drop the connection as soon as the remote says it is done.
                    self.inner = futures::stream::empty().boxed();
                    match text {
                        Some(text) => return Poll::Ready(Some(Ok(text))),
                        None => return Poll::Ready(None),
                    }
                }
                StreamStep::Failed(message) => {
                    self.done = true;
                    self.inner = futures::stream::empty().boxed();
                    return Poll::Ready(Some(Err(DelegationError::Remote {
                        code: crate::a2a::types::error_codes::INTERNAL_ERROR,
                        message,
                    })));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(result: serde_json::Value) -> String {
        format!(
            "data: {}\n\n",
            json!({"jsonrpc": "2.0", "id": 1, "result": result})
        )
    }

    fn byte_stream(
        chunks: Vec<String>,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin + 'static {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    #[test]
    fn test_decoder_handles_split_frames() {
        let mut decoder = SseDecoder::new();
        assert!(
            decoder
                .push(b"event: message\ndata: {\"a\"")
                .expect("frames")
                .is_empty()
        );
        let out = decoder
            .push(b":1}\n\n: keepalive\n\ndata: [DONE]\n\n")
            .expect("frames");
        assert_eq!(out, vec![r#"{"a":1}"#.to_string()]);
    }

    #[test]
    fn test_decoder_crlf_and_trailing_frame() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b"data: one\r\n\r").expect("frames");
        assert!(out.is_empty());
        let out = decoder.push(b"\ndata: two").expect("frames");
        assert_eq!(out, vec!["one".to_string()]);
        assert_eq!(decoder.finish().expect("tail"), Some("two".to_string()));
    }

    #[test]
    fn test_decoder_keeps_codepoint_split_across_chunks() {
        let frame = "data: 13 440 €\n\n".as_bytes();
        // The euro sign is three bytes; cut inside it.
        let cut = frame.len() - 3;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&frame[..cut]).expect("frames").is_empty());
        let out = decoder.push(&frame[cut..]).expect("frames");
        assert_eq!(out, vec!["13 440 €".to_string()]);
    }

    #[test]
    fn test_decoder_rejects_invalid_utf8() {
        let mut decoder = SseDecoder::new();
        let err = decoder
            .push(b"data: \xff\xfe\n\n")
            .expect_err("invalid utf-8");
        assert!(matches!(err, DelegationError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_text_stream_yields_increments_and_stops_on_final() {
        let body = [
            frame(json!({"kind": "status-update", "taskId": "t", "status": {"state": "working"}})),
            frame(json!({"kind": "artifact-update", "taskId": "t", "artifact": {"parts": [{"text": "13"}]}})),
            frame(json!({"kind": "artifact-update", "taskId": "t", "artifact": {"parts": [{"text": "440"}]}})),
            frame(json!({"kind": "status-update", "taskId": "t", "status": {"state": "completed"}, "final": true})),
            frame(json!({"kind": "artifact-update", "taskId": "t", "artifact": {"parts": [{"text": "ignored"}]}})),
        ]
        .concat();
        // Split mid-frame to exercise buffering.
        let (a, b) = body.split_at(body.len() / 3);
        let stream = TextStream::new(events(byte_stream(vec![a.to_string(), b.to_string()])));

        let pieces: Vec<String> = stream
            .map(|r| r.expect("increment"))
            .collect()
            .await;
        assert_eq!(pieces, vec!["13".to_string(), "440".to_string()]);
    }

    fn partial_body() -> String {
        frame(json!({
            "kind": "artifact-update",
            "taskId": "t",
            "artifact": {"parts": [{"text": "13"}]}
        }))
    }

    #[tokio::test]
    async fn test_truncated_stream_is_transport_error() {
        let mut stream = TextStream::new(events(byte_stream(vec![partial_body()])));

        assert_eq!(stream.next().await.map(|r| r.ok()), Some(Some("13".to_string())));
        let end = stream.next().await;
        assert!(matches!(
            end,
            Some(Err(DelegationError::Transport { ref message, .. }))
                if message.contains("before completion")
        ));
        assert!(stream.next().await.is_none());

        let err = TextStream::new(events(byte_stream(vec![partial_body()])))
            .collect_text()
            .await
            .expect_err("truncated");
        assert!(matches!(err, DelegationError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_text_stream_collects_message_reply() {
        let body = frame(json!({"kind": "message", "role": "agent", "parts": [{"text": "42"}]}));
        let text = TextStream::new(events(byte_stream(vec![body])))
            .collect_text()
            .await
            .expect("text");
        assert_eq!(text, "42");
    }

    #[tokio::test]
    async fn test_text_stream_surfaces_remote_error() {
        let body = format!(
            "data: {}\n\n",
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32602, "message": "bad params"}})
        );
        let err = TextStream::new(events(byte_stream(vec![body])))
            .collect_text()
            .await
            .expect_err("error");
        assert!(matches!(err, DelegationError::Remote { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_text_stream_deadline() {
        let limit = Duration::from_millis(50);
        let mut stream = TextStream::new(futures::stream::pending())
            .with_deadline(Instant::now() + limit, limit);
        let first = stream.next().await;
        assert!(matches!(first, Some(Err(DelegationError::Timeout(d))) if d == limit));
        assert!(stream.next().await.is_none());
    }
}
