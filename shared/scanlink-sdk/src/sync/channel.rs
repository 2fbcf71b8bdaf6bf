//! Persistent channel feed over WebSocket

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use scanlink_core::ScanId;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use super::feed::{ChangeFeed, FeedEvent, FeedKind, TransportError};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct ChannelFeed {
    /// Channel endpoint, e.g. `ws://localhost:8080/scan/v1/ws`
    url: String,
    connect_timeout: Duration,
    socket: Option<Socket>,
}

impl ChannelFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            socket: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Endpoint with `lastKnownId` set, keeping any other query pairs.
    fn subscribe_url(&self, last_known_id: ScanId) -> Result<Url, TransportError> {
        let mut url =
            Url::parse(&self.url).map_err(|e| TransportError::Connect(format!("invalid channel url: {}", e)))?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "lastKnownId")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair("lastKnownId", &last_known_id.to_string());
        Ok(url)
    }
}

#[async_trait]
impl ChangeFeed for ChannelFeed {
    fn kind(&self) -> FeedKind {
        FeedKind::PersistentChannel
    }

    async fn connect(&mut self, last_known_id: ScanId) -> Result<(), TransportError> {
        self.close().await;

        let url = self.subscribe_url(last_known_id)?;
        let (socket, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(url = %self.url, last_known_id, "Channel connected");
        self.socket = Some(socket);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<FeedEvent, TransportError> {
        let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            let next = socket.next().await;
            match next {
                Some(Ok(Message::Text(text))) => return FeedEvent::from_json(&text),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Channel closed by hub");
                    self.socket = None;
                    return Err(TransportError::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.socket = None;
                    return Err(TransportError::Connect(e.to_string()));
                }
                None => {
                    self.socket = None;
                    return Err(TransportError::Closed);
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None).await;
            let _ = socket.flush().await;
            debug!(url = %self.url, "Channel closed");
        }
    }
}
