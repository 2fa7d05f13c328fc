//! Server-sent event decoding.

use async_stream::stream;
use futures_util::{Stream, StreamExt};

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `message` when the stream did not name one
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
    pub id: Option<String>,
}

/// Incremental decoder. Feed it raw chunks, get complete events back.
///
/// Only whole lines are interpreted, so multi-byte characters split across
/// chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    partial: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.partial.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line
            .split_once(':')
            .map_or((line, ""), |(f, v)| (f, v.strip_prefix(' ').unwrap_or(v)));

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}

/// Decode an HTTP response body as a stream of events.
///
/// Ends when the body ends; a body error is yielded once and ends the stream.
pub fn sse_events(response: reqwest::Response) -> impl Stream<Item = Result<SseEvent, String>> {
    stream! {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.push(&bytes) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e.to_string());
                    break;
                }
            }
        }
    }
}
