//! Push stream - SSE transport
//!
//! The hub never pushes into these streams. Each one re-reads the store on its
//! own poll timer and emits only when a strictly newer record exists, so a
//! stream that reconnects mid-poll cannot miss the latest record.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
};
use futures_util::stream::{self, Stream};
use scanlink_core::{HubMessage, ScanId, ScanRecord, TransportKind};
use scanlink_store::ScanStore;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::{rest::ApiError, AppState, SubscribeQuery};
use crate::hub::Subscription;

struct PushStream {
    subscription: Subscription,
    store: Arc<dyn ScanStore>,
    poll: Interval,
    heartbeat: Interval,
    greeted: bool,
}

enum StreamTick {
    Poll,
    Heartbeat,
}

fn message_event(message: &HubMessage) -> Event {
    match message.to_json() {
        Ok(json) => Event::default().data(json),
        Err(e) => Event::default().comment(format!("encode failed: {}", e)),
    }
}

fn record_event(record: &ScanRecord) -> Event {
    message_event(&HubMessage::new_scan(record)).id(record.id.to_string())
}

fn last_event_id(headers: &HeaderMap) -> Option<ScanId> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// SSE handler. `lastKnownId` wins over a browser-supplied `Last-Event-ID`.
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let last_known_id = query.last_known_id.or_else(|| last_event_id(&headers)).unwrap_or(0);
    let subscription = state.hub.subscribe(TransportKind::PushStream, last_known_id)?;

    let settings = state.hub.settings();
    let now = Instant::now();
    let mut poll = interval_at(now + settings.stream_poll_interval, settings.stream_poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = interval_at(
        now + settings.stream_heartbeat_interval,
        settings.stream_heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let push = PushStream {
        subscription,
        store: state.store.clone(),
        poll,
        heartbeat,
        greeted: false,
    };

    Ok(Sse::new(stream::unfold(push, next_event)))
}

async fn next_event(mut push: PushStream) -> Option<(Result<Event, Infallible>, PushStream)> {
    if !push.greeted {
        push.greeted = true;
        let welcome = HubMessage::connected(push.subscription.id(), push.subscription.last_delivered_id());
        return Some((Ok(message_event(&welcome)), push));
    }

    let cancel = push.subscription.cancellation();
    loop {
        let tick = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(subscriber_id = %push.subscription.id(), "Push stream closed by hub");
                return None;
            }
            _ = push.poll.tick() => StreamTick::Poll,
            _ = push.heartbeat.tick() => StreamTick::Heartbeat,
        };

        match tick {
            StreamTick::Poll => {
                let cursor = push.subscription.last_delivered_id();
                match push.store.since(cursor).await {
                    Ok(Some(record)) if push.subscription.accept(&record) => {
                        let event = record_event(&record);
                        return Some((Ok(event), push));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(subscriber_id = %push.subscription.id(), reason = e.reason(), "Stream poll failed: {}", e);
                        let event = message_event(&HubMessage::error(e.reason(), e.to_string()));
                        return Some((Ok(event), push));
                    }
                }
            }
            StreamTick::Heartbeat => {
                return Some((Ok(message_event(&HubMessage::heartbeat())), push));
            }
        }
    }
}
