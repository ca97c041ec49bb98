//! Per-session broadcast rooms
//!
//! Maps each session to its set of live subscriptions and delivers serialized
//! events to all of them. Each subscriber owns one bounded mpsc channel, so a
//! dead or hopelessly backlogged peer is detectable per-subscription and can
//! be pruned without touching the rest of the room. Events are serialized
//! once per publish, never once per subscriber.
//!
//! Every published event is also mirrored onto the service-wide EventBus for
//! the diagnostic firehose stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, warn};
use uuid::Uuid;

use aula_common::events::{EventBus, LiveEvent};

/// One serialized event as delivered to a subscriber
#[derive(Debug, Clone)]
pub struct RoomMessage {
    /// Wire event type, used as the SSE event name
    pub event: &'static str,
    /// JSON payload, serialized once per publish
    pub data: String,
}

/// Room manager: session id → set of subscriptions
pub struct RoomManager {
    rooms: RwLock<HashMap<Uuid, HashMap<u64, mpsc::Sender<RoomMessage>>>>,
    next_subscription_id: AtomicU64,
    /// Per-subscriber delivery buffer; a subscriber that falls this far
    /// behind is treated as dead
    capacity: usize,
    bus: EventBus,
}

impl RoomManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_subscription_id: AtomicU64::new(1),
            capacity,
            bus: EventBus::new(capacity),
        }
    }

    /// Service-wide firehose of every published event
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register a viewer connection with a session's room
    ///
    /// Returns the subscription id (for later removal) and the receiving end
    /// of the delivery channel.
    pub async fn subscribe(&self, session_id: Uuid) -> (u64, mpsc::Receiver<RoomMessage>) {
        let subscription_id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);

        let mut rooms = self.rooms.write().await;
        rooms.entry(session_id).or_default().insert(subscription_id, tx);
        debug!(
            session_id = %session_id,
            subscription_id,
            room_size = rooms.get(&session_id).map(HashMap::len).unwrap_or(0),
            "viewer subscribed"
        );
        (subscription_id, rx)
    }

    /// Remove one subscription; drops the room entirely once empty
    ///
    /// Unknown session or subscription ids are a safe no-op, so unsubscribing
    /// after a prune already removed the entry cannot fail.
    pub async fn unsubscribe(&self, session_id: Uuid, subscription_id: u64) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&session_id) {
            if room.remove(&subscription_id).is_some() {
                debug!(session_id = %session_id, subscription_id, "viewer unsubscribed");
            }
            if room.is_empty() {
                rooms.remove(&session_id);
            }
        }
    }

    /// Broadcast an event to every subscription in the session's room
    ///
    /// Subscriptions whose delivery fails are collected during the pass and
    /// pruned afterwards, never while iterating. Publishing to a session with
    /// no subscribers is a no-op. Returns the number of deliveries made.
    pub async fn publish(&self, session_id: Uuid, event: &LiveEvent) -> usize {
        self.bus.emit(event.clone());

        let targets: Vec<(u64, mpsc::Sender<RoomMessage>)> = {
            let rooms = self.rooms.read().await;
            match rooms.get(&session_id) {
                Some(room) => room.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return 0,
            }
        };

        let Some(message) = serialize(event) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (subscription_id, tx) in targets {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        subscription_id,
                        error = %e,
                        "delivery failed, pruning subscription"
                    );
                    dead.push(subscription_id);
                }
            }
        }

        if !dead.is_empty() {
            self.prune(session_id, &dead).await;
        }
        delivered
    }

    /// Unicast delivery to a single subscription (request/response-style
    /// replies that should not be broadcast)
    ///
    /// Returns false if the subscription is unknown or dead; a dead one is
    /// pruned.
    pub async fn send(&self, session_id: Uuid, subscription_id: u64, event: &LiveEvent) -> bool {
        let tx = {
            let rooms = self.rooms.read().await;
            rooms
                .get(&session_id)
                .and_then(|room| room.get(&subscription_id))
                .cloned()
        };
        let Some(tx) = tx else {
            return false;
        };
        let Some(message) = serialize(event) else {
            return false;
        };

        match tx.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    subscription_id,
                    error = %e,
                    "unicast delivery failed, pruning subscription"
                );
                self.prune(session_id, &[subscription_id]).await;
                false
            }
        }
    }

    /// Current number of subscriptions for a session
    pub async fn room_size(&self, session_id: Uuid) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(&session_id).map(HashMap::len).unwrap_or(0)
    }

    async fn prune(&self, session_id: Uuid, subscription_ids: &[u64]) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&session_id) {
            for id in subscription_ids {
                room.remove(id);
            }
            if room.is_empty() {
                rooms.remove(&session_id);
            }
        }
    }
}

// LiveEvent serialization is total (no binary payloads, RFC 3339 timestamps);
// a failure here is a contract violation upstream, logged and dropped rather
// than taking the room down.
fn serialize(event: &LiveEvent) -> Option<RoomMessage> {
    match serde_json::to_string(event) {
        Ok(data) => Some(RoomMessage {
            event: event.event_type(),
            data,
        }),
        Err(e) => {
            error!(event = event.event_type(), error = %e, "event serialization failed");
            None
        }
    }
}
