//! Receiver configuration and feed selection

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::backoff::BackoffPolicy;
use super::channel::ChannelFeed;
use super::feed::{ChangeFeed, TransportError};
use super::polling::{PollingFeed, DEFAULT_POLL_INTERVAL};
use super::stream::StreamFeed;
use crate::codec::RenderOptions;
use crate::http_store::HttpScanStore;
use crate::signal::SignalBoard;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStrategy {
    #[default]
    PersistentChannel,
    PushStream,
    Polling,
}

impl FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "channel" | "ws" | "websocket" => Ok(Self::PersistentChannel),
            "stream" | "sse" => Ok(Self::PushStream),
            "polling" | "poll" => Ok(Self::Polling),
            other => Err(format!("unknown sync strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hub root, e.g. `http://localhost:8080`
    pub hub_url: String,
    pub strategy: SyncStrategy,
    pub poll_interval: Duration,
    /// Silence longer than this marks the connection dead
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub render: RenderOptions,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hub_url: "http://localhost:8080".to_string(),
            strategy: SyncStrategy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            // Two and a half hub heartbeats
            idle_timeout: Duration::from_secs(75),
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffPolicy::default(),
            render: RenderOptions::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let strategy = match std::env::var("SYNC_STRATEGY") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!("{}; using {:?}", e, defaults.strategy);
                defaults.strategy
            }),
            Err(_) => defaults.strategy,
        };

        let max_attempts = std::env::var("SYNC_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.backoff.maximum_attempts);

        Self {
            hub_url: std::env::var("HUB_URL").unwrap_or(defaults.hub_url),
            strategy,
            poll_interval: secs("SYNC_POLL_SECS", defaults.poll_interval),
            idle_timeout: secs("SYNC_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            connect_timeout: secs("SYNC_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            backoff: defaults.backoff.with_maximum_attempts(max_attempts),
            render: defaults.render,
        }
    }

    fn base(&self) -> &str {
        self.hub_url.trim_end_matches('/')
    }

    pub fn channel_url(&self) -> String {
        let base = self.base();
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/scan/v1/ws", ws)
    }

    pub fn stream_url(&self) -> String {
        format!("{}/scan/v1/stream", self.base())
    }
}

/// Build the feed for the configured strategy. The signal board only
/// matters to the polling feed.
pub fn build_feed(config: &SyncConfig, signal: Option<&SignalBoard>) -> Result<Box<dyn ChangeFeed>, TransportError> {
    match config.strategy {
        SyncStrategy::PersistentChannel => Ok(Box::new(
            ChannelFeed::new(config.channel_url()).with_connect_timeout(config.connect_timeout),
        )),
        SyncStrategy::PushStream => Ok(Box::new(StreamFeed::new(config.stream_url())?)),
        SyncStrategy::Polling => {
            let store = HttpScanStore::new(config.base()).map_err(|e| TransportError::Connect(e.to_string()))?;
            let mut feed = PollingFeed::new(Arc::new(store), config.poll_interval);
            if let Some(board) = signal {
                feed = feed.with_signal(board);
            }
            Ok(Box::new(feed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::FeedKind;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("ws".parse::<SyncStrategy>().unwrap(), SyncStrategy::PersistentChannel);
        assert_eq!("SSE".parse::<SyncStrategy>().unwrap(), SyncStrategy::PushStream);
        assert_eq!("polling".parse::<SyncStrategy>().unwrap(), SyncStrategy::Polling);
        assert!("carrier-pigeon".parse::<SyncStrategy>().is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let config = SyncConfig {
            hub_url: "https://hub.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.channel_url(), "wss://hub.example.com/scan/v1/ws");
        assert_eq!(config.stream_url(), "https://hub.example.com/scan/v1/stream");

        let config = SyncConfig::default();
        assert_eq!(config.channel_url(), "ws://localhost:8080/scan/v1/ws");
    }

    #[test]
    fn test_build_feed_per_strategy() {
        for (strategy, kind) in [
            (SyncStrategy::PersistentChannel, FeedKind::PersistentChannel),
            (SyncStrategy::PushStream, FeedKind::PushStream),
            (SyncStrategy::Polling, FeedKind::Polling),
        ] {
            let config = SyncConfig {
                strategy,
                ..Default::default()
            };
            assert_eq!(build_feed(&config, None).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.backoff.maximum_attempts, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(3));
    }
}
