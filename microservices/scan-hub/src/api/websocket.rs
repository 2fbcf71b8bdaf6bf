//! Persistent channel - WebSocket transport
//!
//! Records are pushed the moment they are inserted. On connect the channel
//! replays everything after the subscriber's `lastKnownId` in id order, then
//! switches to live delivery; the subscription's cursor filters anything the
//! replay already covered.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use scanlink_core::{HubMessage, ScanRecord, TransportKind};
use scanlink_store::DEFAULT_AFTER_LIMIT;
use serde::Deserialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{rest::ApiError, AppState, SubscribeQuery};
use crate::hub::Subscription;

type WsSender = SplitSink<WebSocket, Message>;

/// Client-to-server messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Ping,
}

enum ChannelEvent {
    Shutdown,
    Heartbeat,
    Record(Option<ScanRecord>),
    Incoming(Option<Result<Message, axum::Error>>),
}

/// WebSocket upgrade handler. The subscriber is registered before the
/// handshake completes so nothing inserted meanwhile is missed.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Response {
    let last_known_id = query.last_known_id.unwrap_or(0);
    match state.hub.subscribe(TransportKind::PersistentChannel, last_known_id) {
        Ok(subscription) => ws.on_upgrade(move |socket| handle_socket(socket, state, subscription)),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn send_message(sender: &mut WsSender, message: &HubMessage) -> Result<(), axum::Error> {
    let json = message.to_json().map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}

/// Send every stored record after the subscriber's cursor, oldest first.
///
/// A failed read sends `error` and ends the channel; the client re-subscribes
/// from its last id.
async fn replay_backlog(
    state: &AppState,
    subscription: &Subscription,
    sender: &mut WsSender,
) -> Result<usize, axum::Error> {
    let mut cursor = subscription.last_delivered_id();
    let mut replayed = 0;

    loop {
        let page = match state.store.after(cursor, DEFAULT_AFTER_LIMIT).await {
            Ok(page) => page,
            Err(e) => {
                warn!(subscriber_id = %subscription.id(), reason = e.reason(), "Backlog replay failed: {}", e);
                send_message(sender, &HubMessage::error(e.reason(), e.to_string())).await?;
                return Err(axum::Error::new(e));
            }
        };

        let full_page = page.len() == DEFAULT_AFTER_LIMIT;
        for record in &page {
            cursor = record.id;
            if subscription.accept(record) {
                send_message(sender, &HubMessage::new_scan(record)).await?;
                replayed += 1;
            }
        }
        if !full_page {
            break;
        }
    }

    Ok(replayed)
}

async fn handle_socket(socket: WebSocket, state: AppState, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let subscriber_id = subscription.id();

    let welcome = HubMessage::connected(subscriber_id, subscription.last_delivered_id());
    if send_message(&mut sender, &welcome).await.is_err() {
        return;
    }

    match replay_backlog(&state, &subscription, &mut sender).await {
        Ok(replayed) => debug!(subscriber_id = %subscriber_id, replayed, "Backlog replayed"),
        Err(e) => {
            debug!(subscriber_id = %subscriber_id, "Replay aborted, closing channel: {}", e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    }

    let period = state.hub.settings().heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let cancel = subscription.cancellation();

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => ChannelEvent::Shutdown,
            _ = heartbeat.tick() => ChannelEvent::Heartbeat,
            record = subscription.next_record() => ChannelEvent::Record(record),
            incoming = receiver.next() => ChannelEvent::Incoming(incoming),
        };

        let sent = match event {
            ChannelEvent::Shutdown => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            // A closed record stream during shutdown is not an overflow.
            ChannelEvent::Record(None) if cancel.is_cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            ChannelEvent::Heartbeat => send_message(&mut sender, &HubMessage::heartbeat()).await,
            ChannelEvent::Record(Some(record)) => {
                if subscription.accept(&record) {
                    send_message(&mut sender, &HubMessage::new_scan(&record)).await
                } else {
                    Ok(())
                }
            }
            ChannelEvent::Record(None) => {
                let notice = HubMessage::error(
                    "subscriber-dropped",
                    "outbound buffer overflowed; reconnect with lastKnownId",
                );
                let _ = send_message(&mut sender, &notice).await;
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            ChannelEvent::Incoming(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Ping) => send_message(&mut sender, &HubMessage::heartbeat()).await,
                    Err(_) => {
                        debug!(subscriber_id = %subscriber_id, "Ignoring unrecognized client message");
                        Ok(())
                    }
                }
            }
            ChannelEvent::Incoming(Some(Ok(Message::Close(_)))) | ChannelEvent::Incoming(None) => break,
            ChannelEvent::Incoming(Some(Err(e))) => {
                debug!(subscriber_id = %subscriber_id, "Socket error: {}", e);
                break;
            }
            ChannelEvent::Incoming(Some(Ok(_))) => Ok(()),
        };

        if sent.is_err() {
            break;
        }
    }

    info!(
        subscriber_id = %subscriber_id,
        last_delivered_id = subscription.last_delivered_id(),
        "Persistent channel closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ping_parses() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }
}
