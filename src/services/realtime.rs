//! Subscriber map and wire protocol for the live dashboard feed (§4.5).
//!
//! The map is guarded by a `tokio::sync::RwLock` held only for structural
//! mutation -- register, unregister, snapshot the listener list for a
//! profile. Broadcasting itself clones the snapshot and writes to each
//! subscriber's channel outside the lock, so a slow or dead socket never
//! holds up registration for anyone else.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};

use crate::config::RealtimeConfig;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "analytics:realtime")]
    AnalyticsRealtime {
        #[serde(rename = "profileId")]
        profile_id: String,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "analytics:new_view")]
    NewView {
        #[serde(rename = "profileId")]
        profile_id: String,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "analytics:new_click")]
    NewClick {
        #[serde(rename = "profileId")]
        profile_id: String,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "pong")]
    Pong {
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat {
        timestamp: DateTime<Utc>,
        connections: usize,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        code: &'static str,
    },
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ServerMessage>,
}

/// Registration handle returned to the transport layer (WS handler); drop
/// or call `unsubscribe` to deregister.
pub struct Subscription {
    pub profile_id: String,
    pub id: u64,
    pub rx: mpsc::Receiver<ServerMessage>,
}

pub struct RealtimeBus {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl RealtimeBus {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: config.subscriber_buffer,
        }
    }

    pub async fn subscribe(&self, profile_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.subscribers.write().await;
        guard.entry(profile_id.to_string()).or_default().push(Subscriber { id, tx });
        Subscription {
            profile_id: profile_id.to_string(),
            id,
            rx,
        }
    }

    pub async fn unsubscribe(&self, profile_id: &str, id: u64) {
        let mut guard = self.subscribers.write().await;
        if let Some(list) = guard.get_mut(profile_id) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                guard.remove(profile_id);
            }
        }
    }

    /// Total subscriber count across all profiles, reported in `heartbeat`.
    pub async fn connection_count(&self) -> usize {
        self.subscribers.read().await.values().map(Vec::len).sum()
    }

    /// Sends `msg` to every current subscriber of `profile_id`. A full
    /// channel drops the newest message for that subscriber rather than
    /// blocking the publisher -- see §5, Ingest must never block on a
    /// slow socket.
    pub async fn publish(&self, profile_id: &str, msg: ServerMessage) {
        let targets: Vec<mpsc::Sender<ServerMessage>> = {
            let guard = self.subscribers.read().await;
            match guard.get(profile_id) {
                Some(list) => list.iter().map(|s| s.tx.clone()).collect(),
                None => return,
            }
        };
        for tx in targets {
            let _ = tx.try_send(msg.clone());
        }
    }

    /// Sends `msg` to every subscriber of every profile -- used for the
    /// periodic heartbeat, which is not profile-scoped.
    pub async fn broadcast_all(&self, msg: ServerMessage) {
        let targets: Vec<mpsc::Sender<ServerMessage>> = {
            let guard = self.subscribers.read().await;
            guard.values().flatten().map(|s| s.tx.clone()).collect()
        };
        for tx in targets {
            let _ = tx.try_send(msg.clone());
        }
    }

    pub async fn profile_ids(&self) -> Vec<String> {
        self.subscribers.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RealtimeConfig {
        RealtimeConfig {
            push_interval_secs: 10,
            heartbeat_interval_secs: 30,
            sse_interval_secs: 5,
            subscriber_buffer: 4,
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = RealtimeBus::new(&cfg());
        let mut sub = bus.subscribe("profile-1").await;
        bus.publish(
            "profile-1",
            ServerMessage::Pong { timestamp: Utc::now() },
        )
        .await;
        let msg = sub.rx.recv().await.expect("message delivered");
        assert!(matches!(msg, ServerMessage::Pong { .. }));
    }

    #[tokio::test]
    async fn unsubscribe_removes_from_map() {
        let bus = RealtimeBus::new(&cfg());
        let sub = bus.subscribe("profile-1").await;
        assert_eq!(bus.connection_count().await, 1);
        bus.unsubscribe(&sub.profile_id, sub.id).await;
        assert_eq!(bus.connection_count().await, 0);
    }

    #[tokio::test]
    async fn publish_to_unknown_profile_is_a_no_op() {
        let bus = RealtimeBus::new(&cfg());
        bus.publish("nobody-subscribed", ServerMessage::Pong { timestamp: Utc::now() }).await;
    }
}
