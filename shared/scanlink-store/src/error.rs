//! Store Error Types

use scanlink_core::ScanLinkError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No connection to the backing store could be obtained
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The write was rejected; nothing became visible
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Payload must contain at least one non-whitespace character")]
    InvalidPayload,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::StoreUnavailable(_) => "store-unavailable",
            Self::WriteFailed(_) => "write-failed",
            Self::ReadFailed(_) => "read-failed",
            Self::InvalidPayload => "invalid-payload",
            Self::Configuration(_) => "configuration",
        }
    }
}

impl From<StoreError> for ScanLinkError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StoreUnavailable(msg) => ScanLinkError::Unavailable(msg),
            StoreError::InvalidPayload => ScanLinkError::Validation(err.to_string()),
            StoreError::Configuration(msg) => ScanLinkError::Config(msg),
            other => ScanLinkError::Store(other.to_string()),
        }
    }
}
