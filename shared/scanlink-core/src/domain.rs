//! Core domain types used by the hub, the store and the client SDK

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Store-assigned record identifier. Strictly increasing, never reused.
pub type ScanId = i64;

/// One accepted scan. Immutable once the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub id: ScanId,
    pub payload: String,
    pub captured_at: DateTime<Utc>,
    pub persisted_at: DateTime<Utc>,
}

/// A payload is usable only if it carries something other than whitespace.
pub fn is_valid_payload(payload: &str) -> bool {
    !payload.trim().is_empty()
}

/// Hub transport a subscriber chose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    PersistentChannel,
    PushStream,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PersistentChannel => write!(f, "persistent-channel"),
            Self::PushStream => write!(f, "push-stream"),
        }
    }
}

/// Subscriber connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Open,
    Closing,
    Closed,
}

/// Envelope `type` discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Connected,
    NewScan,
    Heartbeat,
    Error,
}

/// Wire envelope shared by the persistent channel and the push stream:
/// `{type, data?, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl HubMessage {
    fn with_data(message_type: MessageType, data: Option<serde_json::Value>) -> Self {
        Self {
            message_type,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Acknowledgement sent once when a subscriber registers
    pub fn connected(connection_id: Uuid, last_known_id: ScanId) -> Self {
        Self::with_data(
            MessageType::Connected,
            Some(serde_json::json!({
                "connectionId": connection_id,
                "lastKnownId": last_known_id,
            })),
        )
    }

    pub fn new_scan(record: &ScanRecord) -> Self {
        Self::with_data(MessageType::NewScan, serde_json::to_value(record).ok())
    }

    pub fn heartbeat() -> Self {
        Self::with_data(MessageType::Heartbeat, None)
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::with_data(
            MessageType::Error,
            Some(serde_json::json!({
                "code": code,
                "message": message.into(),
            })),
        )
    }

    /// The carried record, if this is a well-formed `new-scan`
    pub fn scan_record(&self) -> Option<ScanRecord> {
        if self.message_type != MessageType::NewScan {
            return None;
        }
        self.data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Seam between a successful insert and whatever fans the record out.
///
/// Implementations must not block: the caller is on the insert path.
pub trait ScanPublisher: Send + Sync {
    /// Push a freshly persisted record. Returns how many subscribers it reached.
    fn publish(&self, record: &ScanRecord) -> usize;
}
