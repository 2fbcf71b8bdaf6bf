use async_trait::async_trait;
use scanlink_core::{HubMessage, MessageType, ScanId, ScanRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedKind {
    PersistentChannel,
    PushStream,
    Polling,
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PersistentChannel => write!(f, "persistent-channel"),
            Self::PushStream => write!(f, "push-stream"),
            Self::Polling => write!(f, "polling"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Connected,
    Record(ScanRecord),
    Heartbeat,
    /// The hub reported a problem but kept the connection open
    ServerError { code: String, message: String },
}

impl FeedEvent {
    /// Map a decoded wire message. Malformed `new-scan` payloads are protocol errors.
    pub fn from_message(message: &HubMessage) -> Result<Self, TransportError> {
        match message.message_type {
            MessageType::Connected => Ok(Self::Connected),
            MessageType::Heartbeat => Ok(Self::Heartbeat),
            MessageType::NewScan => message
                .scan_record()
                .map(Self::Record)
                .ok_or_else(|| TransportError::Protocol("new-scan without a record".to_string())),
            MessageType::Error => {
                let field = |name: &str| {
                    message
                        .data
                        .as_ref()
                        .and_then(|d| d.get(name))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                Ok(Self::ServerError {
                    code: field("code"),
                    message: field("message"),
                })
            }
        }
    }

    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        let message = HubMessage::from_json(text).map_err(|e| TransportError::Protocol(e.to_string()))?;
        Self::from_message(&message)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No traffic within the liveness window")]
    Timeout,

    #[error("Unexpected HTTP status {0}")]
    Http(u16),

    #[error("Store read failed: {0}")]
    Store(String),

    #[error("Feed not connected")]
    NotConnected,
}

impl TransportError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect-failed",
            Self::Closed => "closed",
            Self::Protocol(_) => "protocol",
            Self::Timeout => "timeout",
            Self::Http(_) => "http-status",
            Self::Store(_) => "store",
            Self::NotConnected => "not-connected",
        }
    }
}

/// One way of learning about new scans.
///
/// A feed is reusable: `connect` may be called again after a failure or
/// `close`, resuming from the given id.
#[async_trait]
pub trait ChangeFeed: Send {
    fn kind(&self) -> FeedKind;

    async fn connect(&mut self, last_known_id: ScanId) -> Result<(), TransportError>;

    /// Next event. An error means the connection is gone.
    async fn next_event(&mut self) -> Result<FeedEvent, TransportError>;

    async fn close(&mut self);
}
