//! End-to-end flows against a hub bound to an ephemeral port

use async_trait::async_trait;
use chrono::Utc;
use scan_hub::{HubConfig, HubSettings, ScanHubService, StoreBackend};
use scanlink_core::{ScanLinkService, ScanRecord};
use scanlink_sdk::sync::{ChannelFeed, StreamFeed};
use scanlink_sdk::{
    CameraDevice, CameraError, CameraStream, ChangeFeed, DecodeLoop, Decoder, FeedEvent, Frame, HttpScanStore,
    ManualClock, ScanError, ScanOutcome, TransportError,
};
use scanlink_store::{MemoryScanStore, PoolConfig, ScanStore};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Hub {
    base: String,
    service: Arc<ScanHubService>,
    store: HttpScanStore,
    memory: Arc<MemoryScanStore>,
}

impl Hub {
    fn ws_url(&self) -> String {
        format!("{}/scan/v1/ws", self.base.replacen("http://", "ws://", 1))
    }

    fn stream_url(&self) -> String {
        format!("{}/scan/v1/stream", self.base)
    }

    async fn insert(&self, payload: &str) -> ScanRecord {
        self.store.insert(payload, Utc::now()).await.unwrap()
    }
}

async fn spawn_hub(settings: HubSettings) -> Hub {
    let config = HubConfig {
        http_bind: "127.0.0.1:0".to_string(),
        store_backend: StoreBackend::Memory,
        pool: PoolConfig::default(),
        hub: settings,
    };
    let memory = Arc::new(MemoryScanStore::new());
    let service = Arc::new(ScanHubService::with_store(config, memory.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let router = service.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Hub {
        store: HttpScanStore::new(base.clone()).unwrap(),
        base,
        service,
        memory,
    }
}

async fn next(feed: &mut dyn ChangeFeed) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(5), feed.next_event())
        .await
        .expect("no event within 5s")
        .expect("feed failed")
}

async fn next_record(feed: &mut dyn ChangeFeed) -> ScanRecord {
    loop {
        match next(feed).await {
            FeedEvent::Record(record) => return record,
            FeedEvent::Heartbeat | FeedEvent::Connected => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
}

async fn wait_for_no_subscribers(hub: &Hub) -> bool {
    for _ in 0..100 {
        if hub.service.hub().subscriber_count() == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// A camera that always has a frame and a decoder that always reads `payload`.

struct StillCamera;

struct StillStream;

#[async_trait]
impl CameraDevice for StillCamera {
    async fn acquire(&self) -> Result<Box<dyn CameraStream>, CameraError> {
        Ok(Box::new(StillStream))
    }
}

impl CameraStream for StillStream {
    fn capture(&mut self) -> Option<Frame> {
        Some(Frame {
            width: 1,
            height: 1,
            data: vec![0],
        })
    }

    fn release(&mut self) {}
}

struct FixedDecoder {
    payload: String,
    slow_by: Option<(Arc<ManualClock>, chrono::Duration)>,
}

impl Decoder for FixedDecoder {
    fn decode(&self, _frame: &Frame) -> Option<String> {
        if let Some((clock, by)) = &self.slow_by {
            clock.advance(*by);
        }
        Some(self.payload.clone())
    }
}

fn scanner(hub: &Hub, decoder: FixedDecoder, clock: Arc<ManualClock>) -> Arc<DecodeLoop> {
    Arc::new(
        DecodeLoop::new(Arc::new(StillCamera), Arc::new(decoder), Arc::new(hub.store.clone())).with_clock(clock),
    )
}

#[tokio::test]
async fn test_scan_reaches_every_open_channel() {
    let hub = spawn_hub(HubSettings::default()).await;

    let mut first = ChannelFeed::new(hub.ws_url());
    let mut second = ChannelFeed::new(hub.ws_url());
    first.connect(0).await.unwrap();
    second.connect(0).await.unwrap();
    assert_eq!(next(&mut first).await, FeedEvent::Connected);
    assert_eq!(next(&mut second).await, FeedEvent::Connected);

    let decoder = FixedDecoder {
        payload: "42".to_string(),
        slow_by: None,
    };
    let scanner = scanner(&hub, decoder, Arc::new(ManualClock::new(Utc::now())));
    let outcome = scanner.start().await.unwrap().outcome().await;
    let ScanOutcome::Decoded(persisted) = outcome else {
        panic!("expected decoded scan, got {:?}", outcome);
    };

    assert_eq!(next_record(&mut first).await, persisted);
    assert_eq!(next_record(&mut second).await, persisted);
    assert_eq!(persisted.id, 1);
    assert_eq!(persisted.payload, "42");
}

#[tokio::test]
async fn test_stale_scan_never_reaches_displays() {
    let hub = spawn_hub(HubSettings::default()).await;

    let mut display = ChannelFeed::new(hub.ws_url());
    display.connect(0).await.unwrap();
    assert_eq!(next(&mut display).await, FeedEvent::Connected);

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let decoder = FixedDecoder {
        payload: "42".to_string(),
        slow_by: Some((clock.clone(), chrono::Duration::seconds(9))),
    };
    let outcome = scanner(&hub, decoder, clock).start().await.unwrap().outcome().await;
    assert!(matches!(outcome, ScanOutcome::Failed(ScanError::StaleScan { .. })));

    let quiet = tokio::time::timeout(Duration::from_millis(300), display.next_event()).await;
    assert!(quiet.is_err(), "display received {:?}", quiet);
    assert_eq!(hub.store.latest().await.unwrap(), None);
}

#[tokio::test]
async fn test_push_stream_emits_newest_on_poll_tick() {
    let hub = spawn_hub(HubSettings {
        stream_poll_interval: Duration::from_millis(500),
        ..Default::default()
    })
    .await;
    for i in 1..=7 {
        hub.insert(&format!("scan-{}", i)).await;
    }

    let mut stream = StreamFeed::new(hub.stream_url()).unwrap();
    let opened = Instant::now();
    stream.connect(5).await.unwrap();
    assert_eq!(next(&mut stream).await, FeedEvent::Connected);

    let record = next_record(&mut stream).await;
    assert_eq!(record.id, 7);
    assert!(opened.elapsed() >= Duration::from_millis(450), "emitted after {:?}", opened.elapsed());

    // Record 6 is never sent, and 7 is not repeated.
    let quiet = tokio::time::timeout(Duration::from_millis(1200), stream.next_event()).await;
    assert!(quiet.is_err(), "stream emitted {:?}", quiet);
}

#[tokio::test]
async fn test_channel_reconnect_replays_missed_records_in_order() {
    let hub = spawn_hub(HubSettings::default()).await;
    for payload in ["a", "b", "c"] {
        hub.insert(payload).await;
    }

    let mut channel = ChannelFeed::new(hub.ws_url());
    channel.connect(0).await.unwrap();
    let mut seen: Vec<i64> = Vec::new();
    for _ in 0..3 {
        seen.push(next_record(&mut channel).await.id);
    }
    assert_eq!(seen, vec![1, 2, 3]);
    channel.close().await;

    hub.insert("d").await;
    hub.insert("e").await;

    channel.connect(3).await.unwrap();
    assert_eq!(next(&mut channel).await, FeedEvent::Connected);
    assert_eq!(next_record(&mut channel).await.id, 4);
    assert_eq!(next_record(&mut channel).await.id, 5);

    let live = hub.insert("f").await;
    assert_eq!(next_record(&mut channel).await, live);
}

#[tokio::test]
async fn test_channel_heartbeats_while_idle() {
    let hub = spawn_hub(HubSettings {
        heartbeat_interval: Duration::from_millis(200),
        ..Default::default()
    })
    .await;

    let mut channel = ChannelFeed::new(hub.ws_url());
    channel.connect(0).await.unwrap();
    assert_eq!(next(&mut channel).await, FeedEvent::Connected);
    assert_eq!(next(&mut channel).await, FeedEvent::Heartbeat);
}

#[tokio::test]
async fn test_failed_replay_closes_channel_and_reconnect_heals_gap() {
    let hub = spawn_hub(HubSettings::default()).await;
    for payload in ["a", "b", "c"] {
        hub.insert(payload).await;
    }
    hub.memory.set_offline(true);

    let mut channel = ChannelFeed::new(hub.ws_url());
    channel.connect(0).await.unwrap();
    assert_eq!(next(&mut channel).await, FeedEvent::Connected);
    match next(&mut channel).await {
        FeedEvent::ServerError { code, .. } => assert_eq!(code, "store-unavailable"),
        other => panic!("expected a store error, got {:?}", other),
    }

    let closed = tokio::time::timeout(Duration::from_secs(5), channel.next_event())
        .await
        .expect("channel left open after failed replay");
    assert!(
        matches!(closed, Err(TransportError::Closed) | Err(TransportError::Connect(_))),
        "got {:?}",
        closed
    );
    assert!(wait_for_no_subscribers(&hub).await);

    hub.memory.set_offline(false);
    channel.connect(0).await.unwrap();
    assert_eq!(next(&mut channel).await, FeedEvent::Connected);
    let replayed: Vec<i64> = vec![
        next_record(&mut channel).await.id,
        next_record(&mut channel).await.id,
        next_record(&mut channel).await.id,
    ];
    assert_eq!(replayed, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_push_stream_heartbeats_while_idle() {
    let hub = spawn_hub(HubSettings {
        stream_poll_interval: Duration::from_secs(60),
        stream_heartbeat_interval: Duration::from_millis(200),
        ..Default::default()
    })
    .await;

    let mut stream = StreamFeed::new(hub.stream_url()).unwrap();
    let opened = Instant::now();
    stream.connect(0).await.unwrap();
    assert_eq!(next(&mut stream).await, FeedEvent::Connected);
    assert_eq!(next(&mut stream).await, FeedEvent::Heartbeat);
    assert!(opened.elapsed() >= Duration::from_millis(150), "heartbeat after {:?}", opened.elapsed());
    assert_eq!(next(&mut stream).await, FeedEvent::Heartbeat);
}

#[tokio::test]
async fn test_subscribers_listed_and_closed_on_shutdown() {
    let hub = spawn_hub(HubSettings::default()).await;

    let mut channel = ChannelFeed::new(hub.ws_url());
    channel.connect(0).await.unwrap();
    assert_eq!(next(&mut channel).await, FeedEvent::Connected);

    let listed: serde_json::Value = reqwest::get(format!("{}/scan/v1/subscribers", hub.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let subscribers = listed["data"].as_array().unwrap();
    assert_eq!(subscribers.len(), 1);
    assert_eq!(subscribers[0]["transportKind"], "persistent-channel");

    hub.service.shutdown().await.unwrap();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Err(e) = channel.next_event().await {
                return e;
            }
        }
    })
    .await
    .expect("channel not closed");
    assert!(matches!(closed, TransportError::Closed | TransportError::Connect(_)));
    assert_eq!(hub.service.hub().subscriber_count(), 0);
}

#[tokio::test]
async fn test_blank_payload_rejected_with_400() {
    let hub = spawn_hub(HubSettings::default()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/scan/v1/scans", hub.base))
        .json(&serde_json::json!({ "payload": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(hub.store.latest().await.unwrap(), None);
}
