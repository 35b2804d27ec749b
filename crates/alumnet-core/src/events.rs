use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tokio::sync::{broadcast, mpsc};

use crate::rooms;

/// Who an outbound event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum EventTarget {
    /// Every connection subscribed to the channel.
    Channel(String),
    /// Every live connection.
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub target: EventTarget,
}

/// Broadcast-based event bus for real-time dispatch.
///
/// Each gateway connection holds a receiver and keeps the events whose
/// target it is subscribed to. An optional relay hook forwards every
/// published event to other server instances.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<ServerEvent>>,
    relay: Arc<OnceLock<mpsc::UnboundedSender<ServerEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            relay: Arc::new(OnceLock::new()),
        }
    }

    pub fn publish(&self, event: ServerEvent) {
        if let Some(relay) = self.relay.get() {
            let _ = relay.send(event.clone());
        }
        self.publish_local(event);
    }

    /// Deliver to connections on this instance only.
    pub fn publish_local(&self, event: ServerEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServerEvent>> {
        self.sender.subscribe()
    }

    /// Install the cross-instance relay. Only the first call takes effect.
    pub fn attach_relay(&self, relay: mpsc::UnboundedSender<ServerEvent>) -> bool {
        self.relay.set(relay).is_ok()
    }

    pub fn emit_to_channel(&self, channel: &str, event_type: &str, payload: impl Serialize) {
        self.publish(ServerEvent {
            event_type: event_type.to_string(),
            payload: to_payload(payload),
            target: EventTarget::Channel(channel.to_string()),
        });
    }

    /// Deliver to every connection of `identity`, on any device.
    pub fn emit_to_identity(&self, identity: &str, event_type: &str, payload: impl Serialize) {
        self.emit_to_channel(&rooms::personal_channel(identity), event_type, payload);
    }

    pub fn broadcast_all(&self, event_type: &str, payload: impl Serialize) {
        self.publish(ServerEvent {
            event_type: event_type.to_string(),
            payload: to_payload(payload),
            target: EventTarget::All,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

fn to_payload(payload: impl Serialize) -> serde_json::Value {
    serde_json::to_value(payload).unwrap_or_else(|e| {
        tracing::warn!("dropping unserializable event payload: {e}");
        serde_json::Value::Null
    })
}
