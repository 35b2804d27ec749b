//! Cross-instance event fan-out over Redis pub/sub.
//!
//! Active only with the distributed presence backend. Every event published
//! on the local bus is wrapped in an envelope tagged with this instance's
//! origin id and sent to a shared pub/sub channel; envelopes arriving from
//! other instances are delivered to local connections only.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::CoreError;
use crate::events::{EventBus, ServerEvent};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    origin: String,
    event: ServerEvent,
}

/// Running bridge tasks. Dropping the handle does not stop them; call
/// [`EventBridge::shutdown`].
pub struct EventBridge {
    tasks: Vec<JoinHandle<()>>,
}

impl EventBridge {
    pub async fn start(
        client: redis::Client,
        bus: EventBus,
        channel: &str,
    ) -> Result<Self, CoreError> {
        let origin = uuid::Uuid::new_v4().to_string();
        let conn = client.get_connection_manager().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        if !bus.attach_relay(tx) {
            return Err(CoreError::Internal(
                "event bus already has a relay attached".into(),
            ));
        }

        let publisher = tokio::spawn(run_publisher(
            conn,
            channel.to_string(),
            origin.clone(),
            rx,
        ));
        let subscriber = tokio::spawn(run_subscriber(
            client,
            bus,
            channel.to_string(),
            origin.clone(),
        ));

        tracing::info!(%origin, channel, "cross-instance event bridge started");
        Ok(Self {
            tasks: vec![publisher, subscriber],
        })
    }

    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

async fn run_publisher(
    mut conn: redis::aio::ConnectionManager,
    channel: String,
    origin: String,
    mut rx: mpsc::UnboundedReceiver<ServerEvent>,
) {
    while let Some(event) = rx.recv().await {
        let payload = match encode(&origin, event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("failed to encode bridged event: {e}");
                continue;
            }
        };
        let result: redis::RedisResult<i64> = redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(payload)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::warn!("failed to publish bridged event: {e}");
        }
    }
}

async fn run_subscriber(client: redis::Client, bus: EventBus, channel: String, origin: String) {
    loop {
        match subscribe_once(&client, &bus, &channel, &origin).await {
            Ok(()) => tracing::warn!(channel = %channel, "event bridge subscription ended, resubscribing"),
            Err(e) => tracing::warn!(channel = %channel, "event bridge subscription failed: {e}"),
        }
        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
    }
}

async fn subscribe_once(
    client: &redis::Client,
    bus: &EventBus,
    channel: &str,
    origin: &str,
) -> redis::RedisResult<()> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!("ignoring non-text bridge payload: {e}");
                continue;
            }
        };
        if let Some(event) = decode_foreign(origin, &payload) {
            bus.publish_local(event);
        }
    }
    Ok(())
}

fn encode(origin: &str, event: ServerEvent) -> serde_json::Result<String> {
    serde_json::to_string(&Envelope {
        origin: origin.to_string(),
        event,
    })
}

/// The event inside `payload`, unless it was published by `origin` itself.
fn decode_foreign(origin: &str, payload: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<Envelope>(payload) {
        Ok(envelope) if envelope.origin == origin => None,
        Ok(envelope) => Some(envelope.event),
        Err(e) => {
            tracing::debug!("ignoring malformed bridge envelope: {e}");
            None
        }
    }
}
