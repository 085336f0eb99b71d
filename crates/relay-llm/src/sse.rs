//! # SSE Parser
//!
//! Splits a chunked HTTP body into Server-Sent Events `data:` payloads.
//! Handles line buffering across chunk boundaries, CRLF line endings,
//! comment lines, and the `[DONE]` end marker.

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use relay_core::SourceError;

/// One meaningful SSE line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseItem {
    /// The payload of a `data:` line.
    Data(String),
    /// The `data: [DONE]` marker.
    Done,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct ParserState {
    inner: ByteStream,
    buffer: BytesMut,
    finished: bool,
}

/// Parse SSE lines from a byte stream.
///
/// A transport read error yields one `Err(StreamInterrupted)` and ends the
/// stream. Content left in the buffer when the body ends is processed as a
/// final line.
pub fn parse_sse<S>(byte_stream: S) -> impl Stream<Item = Result<SseItem, SourceError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let state = ParserState {
        inner: Box::pin(byte_stream),
        buffer: BytesMut::with_capacity(8192),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            if let Some(newline_pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let mut line_bytes = state.buffer.split_to(newline_pos + 1);
                line_bytes.truncate(line_bytes.len() - 1);
                if line_bytes.last() == Some(&b'\r') {
                    line_bytes.truncate(line_bytes.len() - 1);
                }

                let Ok(line) = std::str::from_utf8(&line_bytes) else {
                    tracing::warn!("skipping SSE line with invalid UTF-8");
                    continue;
                };

                if let Some(item) = classify_line(line) {
                    return Some((Ok(item), state));
                }
                continue;
            }

            match state.inner.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(SourceError::StreamInterrupted(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    if state.buffer.is_empty() {
                        return None;
                    }
                    let remaining = state.buffer.split();
                    let item = std::str::from_utf8(&remaining)
                        .ok()
                        .and_then(|line| classify_line(line.trim_end()));
                    return item.map(|item| (Ok(item), state));
                }
            }
        }
    })
}

/// Classify a single SSE line. Comments, blank lines, and non-data fields
/// (`event:`, `id:`, `retry:`) yield `None`.
pub fn classify_line(line: &str) -> Option<SseItem> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim() == "[DONE]" {
        return Some(SseItem::Done);
    }
    if data.trim().is_empty() {
        return None;
    }
    Some(SseItem::Data(data.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send {
        let owned: Vec<Result<Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        futures::stream::iter(owned)
    }

    async fn collect(parts: &[&str]) -> Vec<SseItem> {
        parse_sse(chunks(parts))
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    #[test]
    fn classify_lines() {
        assert_eq!(classify_line("data: {}"), Some(SseItem::Data("{}".into())));
        assert_eq!(classify_line("data:{}"), Some(SseItem::Data("{}".into())));
        assert_eq!(classify_line("data: [DONE]"), Some(SseItem::Done));
        assert_eq!(classify_line(": keep-alive"), None);
        assert_eq!(classify_line("event: message"), None);
        assert_eq!(classify_line(""), None);
        assert_eq!(classify_line("data: "), None);
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let items = collect(&["data: {\"a\"", ":1}\n\nda", "ta: [DONE]\n\n"]).await;
        assert_eq!(
            items,
            vec![SseItem::Data("{\"a\":1}".into()), SseItem::Done]
        );
    }

    #[tokio::test]
    async fn crlf_line_endings() {
        let items = collect(&["data: one\r\n\r\ndata: two\r\n\r\n"]).await;
        assert_eq!(
            items,
            vec![SseItem::Data("one".into()), SseItem::Data("two".into())]
        );
    }

    #[tokio::test]
    async fn trailing_line_without_newline() {
        let items = collect(&["data: first\n", "data: last"]).await;
        assert_eq!(
            items,
            vec![SseItem::Data("first".into()), SseItem::Data("last".into())]
        );
    }

    #[tokio::test]
    async fn empty_body_yields_nothing() {
        assert!(collect(&[]).await.is_empty());
    }
}
