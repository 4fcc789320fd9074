//! Streaming Support
//!
//! Re-frames the upstream Server-Sent Events stream into a plain byte stream of
//! generated text.
//!
//! A spawned producer task reads the upstream body, splits it into SSE records,
//! parses each record and pushes the text deltas into a bounded channel.
//! [`TextStream`] is the consumer side of that channel. The producer stops on
//! the finish signal, on the first malformed record, on a transport error, or
//! as soon as the consumer goes away.

use crate::error::{KeyrelayError, Result};
use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Sentinel some providers send after the last chunk
const DONE_SENTINEL: &str = "[DONE]";

/// A streaming chunk from the API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Chunk ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Model name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Choices with deltas
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

/// A choice in a streaming chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChoice {
    /// Choice index
    #[serde(default)]
    pub index: u32,

    /// The delta (partial message)
    #[serde(default)]
    pub delta: StreamDelta,

    /// Finish reason (set in final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Delta content in a streaming chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Role (usually only in first chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Content delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// What a single upstream record means for the output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Incremental content; may be empty (role-only or choiceless chunks)
    Delta(String),

    /// The first choice carries a finish reason, or the `[DONE]` sentinel arrived
    Finished,

    /// The record's payload is not valid chunk JSON
    ParseError(String),
}

/// Interpret the `data` field of one SSE record
pub fn parse_event(data: &str) -> UpstreamEvent {
    let data = data.trim();
    if data == DONE_SENTINEL {
        return UpstreamEvent::Finished;
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => return UpstreamEvent::ParseError(format!("{}. Data: {}", e, data)),
    };

    match chunk.choices.into_iter().next() {
        Some(choice) if choice.finish_reason.is_some() => UpstreamEvent::Finished,
        Some(choice) => UpstreamEvent::Delta(choice.delta.content.unwrap_or_default()),
        None => UpstreamEvent::Delta(String::new()),
    }
}

/// Plain-text output stream produced by [`reframe`]
///
/// Single pass and forward only. Yields text segments in upstream order and ends
/// with `None` on success, or with one `Err` followed by `None` on failure.
/// Dropping it releases the upstream connection.
#[derive(Debug)]
pub struct TextStream {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl TextStream {
    /// Read the stream to the end and return the concatenated text
    pub async fn into_text(mut self) -> Result<String> {
        let mut buf = Vec::new();
        while let Some(segment) = self.next().await {
            buf.extend_from_slice(&segment?);
        }
        String::from_utf8(buf).map_err(|e| KeyrelayError::StreamParse(e.to_string()))
    }
}

impl Stream for TextStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Spawn the re-framing producer for an upstream SSE body
///
/// Must be called from within a tokio runtime.
pub fn reframe<S, E>(body: S) -> TextStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    // Capacity 1: at most one record is buffered ahead of the consumer.
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(drive(body, tx));
    TextStream { rx }
}

async fn drive<S, E>(body: S, tx: mpsc::Sender<Result<Bytes>>)
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let mut events = Box::pin(body.eventsource());

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!("output stream dropped, releasing upstream body");
                return;
            }
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(error = %e, "upstream stream failed");
                let _ = tx.send(Err(KeyrelayError::Stream(e.to_string()))).await;
                return;
            }
            None => {
                debug!("upstream body ended without finish signal");
                return;
            }
        };

        trace!(event = %event.event, data = %event.data, "SSE event");

        match parse_event(&event.data) {
            UpstreamEvent::Delta(text) => {
                if text.is_empty() {
                    continue;
                }
                if tx.send(Ok(Bytes::from(text))).await.is_err() {
                    debug!("output stream dropped, releasing upstream body");
                    return;
                }
            }
            UpstreamEvent::Finished => {
                trace!("finish signal received");
                return;
            }
            UpstreamEvent::ParseError(msg) => {
                warn!(error = %msg, "malformed stream record");
                let _ = tx.send(Err(KeyrelayError::StreamParse(msg))).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn body(records: &[&str]) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> {
        let chunks: Vec<_> = records
            .iter()
            .map(|r| Ok(Bytes::from(r.to_string())))
            .collect();
        futures::stream::iter(chunks)
    }

    #[test]
    fn test_parse_event_delta() {
        let data = r#"{"id":"chatcmpl-123","model":"gpt-4","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(parse_event(data), UpstreamEvent::Delta("Hello".to_string()));
    }

    #[test]
    fn test_parse_event_finish_and_done() {
        let data = r#"{"choices":[{"finish_reason":"stop","delta":{}}]}"#;
        assert_eq!(parse_event(data), UpstreamEvent::Finished);
        assert_eq!(parse_event(" [DONE] "), UpstreamEvent::Finished);
    }

    #[test]
    fn test_parse_event_role_only_and_choiceless() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_event(data), UpstreamEvent::Delta(String::new()));
        assert_eq!(parse_event("{}"), UpstreamEvent::Delta(String::new()));
    }

    #[test]
    fn test_parse_event_malformed() {
        assert!(matches!(
            parse_event("{not json"),
            UpstreamEvent::ParseError(_)
        ));
    }

    #[tokio::test]
    async fn test_reframe_hello() {
        let stream = reframe(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"choices\":[{\"finish_reason\":\"stop\",\"delta\":{}}]}\n\n",
        ]));

        let segments: Vec<_> = stream.collect().await;
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].as_ref().unwrap(), &Bytes::from("Hel"));
        assert_eq!(segments[1].as_ref().unwrap(), &Bytes::from("lo"));
    }

    #[tokio::test]
    async fn test_reframe_ignores_records_after_finish() {
        let text = reframe(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"done\"}}]}\n\n",
            "data: {\"choices\":[{\"finish_reason\":\"stop\",\"delta\":{}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" extra\"}}]}\n\n",
        ]))
        .into_text()
        .await
        .unwrap();

        assert_eq!(text, "done");
    }

    #[tokio::test]
    async fn test_reframe_assembles_split_records() {
        let text = reframe(body(&[
            "event: message\ndata: {\"choices\":[{\"delta\":",
            "{\"content\":\"Hi there\"}}]}\n",
            "\ndata: [DONE]\n\n",
        ]))
        .into_text()
        .await
        .unwrap();

        assert_eq!(text, "Hi there");
    }

    #[tokio::test]
    async fn test_reframe_parse_error_stops_stream() {
        let mut stream = reframe(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: {broken\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n",
        ]));

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("ok"));
        assert!(matches!(
            stream.next().await,
            Some(Err(KeyrelayError::StreamParse(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_reframe_transport_error() {
        let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )),
        ];
        let result = reframe(futures::stream::iter(chunks)).into_text().await;

        assert!(matches!(result, Err(KeyrelayError::Stream(_))));
    }

    #[tokio::test]
    async fn test_reframe_upstream_end_closes_cleanly() {
        let text = reframe(body(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
        ]))
        .into_text()
        .await
        .unwrap();

        assert_eq!(text, "partial");
    }

    #[tokio::test]
    async fn test_dropping_output_releases_upstream() {
        let (tx, rx) =
            futures::channel::mpsc::unbounded::<std::result::Result<Bytes, std::io::Error>>();
        tx.unbounded_send(Ok(Bytes::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n",
        )))
        .unwrap();

        let mut stream = reframe(rx);
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("x"));
        drop(stream);

        // The producer drops the upstream body, which closes our sender.
        let released = tokio::time::timeout(Duration::from_secs(2), async {
            while !tx.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(released.is_ok());
    }
}
