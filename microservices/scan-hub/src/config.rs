//! Hub Configuration

use scanlink_core::{Result, ScanLinkError};
use scanlink_store::PoolConfig;
use std::time::Duration;

/// Which persistence technology backs the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl std::str::FromStr for StoreBackend {
    type Err = ScanLinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ScanLinkError::Config(format!("Unknown STORE_BACKEND: {}", other))),
        }
    }
}

/// Timers and buffers of the broadcast hub
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Heartbeat period on persistent channels
    pub heartbeat_interval: Duration,
    /// How often each push stream re-reads the store
    pub stream_poll_interval: Duration,
    /// Heartbeat period on push streams
    pub stream_heartbeat_interval: Duration,
    /// Outbound records buffered per channel subscriber before it is dropped
    pub subscriber_buffer: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            stream_poll_interval: Duration::from_secs(2),
            stream_heartbeat_interval: Duration::from_secs(30),
            subscriber_buffer: 256,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub http_bind: String,
    pub store_backend: StoreBackend,
    pub pool: PoolConfig,
    pub hub: HubSettings,
}

fn secs_from_env(key: &str, default: u64) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| ScanLinkError::Config(format!("Invalid {}: {}", key, raw))),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

impl HubConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = HubSettings::default();
        Ok(Self {
            http_bind: std::env::var("HTTP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            store_backend: std::env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "memory".to_string())
                .parse()?,
            pool: PoolConfig::from_env(),
            hub: HubSettings {
                heartbeat_interval: secs_from_env("HEARTBEAT_SECS", 30)?,
                stream_poll_interval: secs_from_env("STREAM_POLL_SECS", 2)?,
                stream_heartbeat_interval: secs_from_env("STREAM_HEARTBEAT_SECS", 30)?,
                subscriber_buffer: std::env::var("SUBSCRIBER_BUFFER")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(defaults.subscriber_buffer),
            },
        })
    }
}
