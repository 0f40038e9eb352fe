//! WebSocket and Server-Sent-Events transports for the Realtime fan-out
//! (§4.5). `RealtimeBus` (in `services::realtime`) owns the subscriber map;
//! this module only speaks the wire protocol and drives the per-connection
//! event loop.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::sse::{Event, KeepAlive, Sse},
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tokio_stream::StreamMap;
use tracing::{debug, warn};

use crate::chain::{ChainAdapter, Existence};
use crate::services::realtime::ServerMessage;
use crate::AppState;

pub fn create_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/stream/:profile_id", get(sse_handler))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "subscribe:profile")]
    SubscribeProfile {
        #[serde(rename = "profileId")]
        profile_id: String,
    },
    #[serde(rename = "unsubscribe:profile")]
    UnsubscribeProfile {
        #[serde(rename = "profileId")]
        profile_id: String,
    },
    #[serde(rename = "ping")]
    Ping,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One subscriber registration the socket currently holds, so we can
/// deregister cleanly from `RealtimeBus` on unsubscribe or disconnect.
struct Registration {
    subscriber_id: u64,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let mut registrations: HashMap<String, Registration> = HashMap::new();
    let mut inbox: StreamMap<String, ReceiverStream<ServerMessage>> = StreamMap::new();

    let mut heartbeat = tokio::time::interval(Duration::from_secs(state.config.realtime.heartbeat_interval_secs));
    let mut push_tick = tokio::time::interval(Duration::from_secs(state.config.realtime.push_interval_secs));

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = handle_client_message(&text, &state, &mut sender, &mut registrations, &mut inbox).await {
                            warn!(error = %err, "failed to send websocket response");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket receive error");
                        break;
                    }
                    _ => {}
                }
            }
            Some((_, msg)) = inbox.next(), if !inbox.is_empty() => {
                if send_message(&mut sender, &msg).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                let msg = ServerMessage::Heartbeat {
                    timestamp: Utc::now(),
                    connections: state.realtime.connection_count().await,
                };
                if send_message(&mut sender, &msg).await.is_err() {
                    break;
                }
            }
            _ = push_tick.tick() => {
                for profile_id in registrations.keys().cloned().collect::<Vec<_>>() {
                    let data = match state.query.get_realtime_analytics(&profile_id).await {
                        Ok(snapshot) => serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null),
                        Err(err) => {
                            warn!(profile_id = %profile_id, error = %err, "failed to refresh realtime snapshot");
                            continue;
                        }
                    };
                    let msg = ServerMessage::AnalyticsRealtime { profile_id, data, timestamp: Utc::now() };
                    if send_message(&mut sender, &msg).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    for (profile_id, registration) in registrations {
        state.realtime.unsubscribe(&profile_id, registration.subscriber_id).await;
    }
}

async fn send_message(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).unwrap_or_default();
    sender.send(Message::Text(text)).await
}

async fn handle_client_message(
    text: &str,
    state: &AppState,
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    registrations: &mut HashMap<String, Registration>,
    inbox: &mut StreamMap<String, ReceiverStream<ServerMessage>>,
) -> Result<(), axum::Error> {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(err) => {
            let msg = ServerMessage::Error { message: format!("malformed message: {err}"), code: "SUBSCRIPTION_ERROR" };
            return send_message(sender, &msg).await;
        }
    };

    match parsed {
        ClientMessage::SubscribeProfile { profile_id } => {
            match state.chain.profile_exists(&profile_id).await {
                Existence::NotExists => {
                    let msg = ServerMessage::Error { message: format!("profile {profile_id} not found"), code: "PROFILE_NOT_FOUND" };
                    return send_message(sender, &msg).await;
                }
                Existence::Exists | Existence::Unknown => {}
            }

            let subscription = state.realtime.subscribe(&profile_id).await;
            registrations.insert(profile_id.clone(), Registration { subscriber_id: subscription.id });
            inbox.insert(profile_id.clone(), ReceiverStream::new(subscription.rx));

            let data = match state.query.get_realtime_analytics(&profile_id).await {
                Ok(snapshot) => serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null),
                Err(_) => serde_json::Value::Null,
            };
            let msg = ServerMessage::AnalyticsRealtime { profile_id, data, timestamp: Utc::now() };
            send_message(sender, &msg).await
        }
        ClientMessage::UnsubscribeProfile { profile_id } => {
            if let Some(registration) = registrations.remove(&profile_id) {
                state.realtime.unsubscribe(&profile_id, registration.subscriber_id).await;
            }
            inbox.remove(&profile_id);
            Ok(())
        }
        ClientMessage::Ping => {
            let msg = ServerMessage::Pong { timestamp: Utc::now() };
            send_message(sender, &msg).await
        }
    }
}

/// Single-profile SSE stream, pushing the same `analytics:realtime` payload
/// every `realtime.sseIntervalSecs` until the client disconnects (§4.5).
async fn sse_handler(
    State(state): State<AppState>,
    Path(profile_id): Path<String>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_secs(state.config.realtime.sse_interval_secs));
    let stream = IntervalStream::new(interval).then(move |_| {
        let state = state.clone();
        let profile_id = profile_id.clone();
        async move {
            let payload = match state.query.get_realtime_analytics(&profile_id).await {
                Ok(snapshot) => serde_json::json!({
                    "profileId": profile_id,
                    "data": snapshot,
                    "timestamp": Utc::now(),
                }),
                Err(err) => {
                    warn!(profile_id = %profile_id, error = %err, "sse snapshot refresh failed");
                    serde_json::json!({ "profileId": profile_id, "data": serde_json::Value::Null, "timestamp": Utc::now() })
                }
            };
            Ok(Event::default().event("analytics:realtime").json_data(&payload).unwrap_or_else(|_| Event::default()))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
