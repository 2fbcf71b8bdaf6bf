//! Push stream feed over server-sent events

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use scanlink_core::ScanId;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

use super::feed::{ChangeFeed, FeedEvent, FeedKind, TransportError};

/// Incremental `text/event-stream` parser. Yields the `data` of each
/// complete event; comments and other fields are skipped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    ready: VecDeque<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw body bytes. Events are cut on byte boundaries, so a
    /// multi-byte character split across chunks decodes intact.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let block = String::from_utf8_lossy(&block);
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|value| value.strip_prefix(' ').unwrap_or(value))
                .collect();
            if !data.is_empty() {
                self.ready.push_back(data.join("\n"));
            }
        }
    }

    pub fn next_data(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.ready.clear();
    }
}

pub struct StreamFeed {
    /// Stream endpoint, e.g. `http://localhost:8080/scan/v1/stream`
    url: String,
    client: Client,
    response: Option<Response>,
    parser: SseParser,
}

impl StreamFeed {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        // No overall timeout: the response body never ends on its own.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
            response: None,
            parser: SseParser::new(),
        })
    }
}

#[async_trait]
impl ChangeFeed for StreamFeed {
    fn kind(&self) -> FeedKind {
        FeedKind::PushStream
    }

    async fn connect(&mut self, last_known_id: ScanId) -> Result<(), TransportError> {
        self.close().await;

        let response = self
            .client
            .get(&self.url)
            .query(&[("lastKnownId", last_known_id)])
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Http(response.status().as_u16()));
        }

        info!(url = %self.url, last_known_id, "Push stream connected");
        self.response = Some(response);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<FeedEvent, TransportError> {
        loop {
            if let Some(data) = self.parser.next_data() {
                return FeedEvent::from_json(&data);
            }

            let response = self.response.as_mut().ok_or(TransportError::NotConnected)?;
            let chunk = response.chunk().await;
            match chunk {
                Ok(Some(bytes)) => self.parser.push(&bytes),
                Ok(None) => {
                    self.response = None;
                    return Err(TransportError::Closed);
                }
                Err(e) => {
                    self.response = None;
                    return Err(TransportError::Connect(e.to_string()));
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.response.take().is_some() {
            debug!(url = %self.url, "Push stream closed");
        }
        self.parser.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_events_split_across_chunks() {
        let mut parser = SseParser::new();
        parser.push(b"data: {\"a\"");
        assert_eq!(parser.next_data(), None);

        parser.push(b":1}\n\ndata: second\n");
        assert_eq!(parser.next_data().as_deref(), Some("{\"a\":1}"));
        assert_eq!(parser.next_data(), None);

        parser.push(b"\n");
        assert_eq!(parser.next_data().as_deref(), Some("second"));
    }

    #[test]
    fn test_skips_comments_and_ids() {
        let mut parser = SseParser::new();
        parser.push(b": keep-alive\n\nid: 7\ndata:x\r\n\r\n");
        assert_eq!(parser.next_data().as_deref(), Some("x"));
        assert_eq!(parser.next_data(), None);
    }

    #[test]
    fn test_split_multibyte_character() {
        let mut parser = SseParser::new();
        let event = "data: caf\u{e9}\n\n".as_bytes();
        let split = event.len() - 3;
        parser.push(&event[..split]);
        parser.push(&event[split..]);
        assert_eq!(parser.next_data().as_deref(), Some("caf\u{e9}"));
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut parser = SseParser::new();
        parser.push(b"data: one\ndata: two\n\n");
        assert_eq!(parser.next_data().as_deref(), Some("one\ntwo"));
    }

    #[tokio::test]
    async fn test_next_event_requires_connection() {
        let mut feed = StreamFeed::new("http://127.0.0.1:1/scan/v1/stream").unwrap();
        assert_eq!(feed.next_event().await, Err(TransportError::NotConnected));
    }
}
