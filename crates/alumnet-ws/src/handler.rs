use alumnet_core::events::ServerEvent;
use alumnet_core::{rooms, AppState};
use alumnet_models::gateway::{ClientEvent, Ready, EVENT_READY};
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::dispatch::handle_client_event;
use crate::session::Session;

const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Why a session loop ended.
enum Departure {
    Closed,
    /// The server is going down; no grace timer would outlive it.
    Shutdown,
}

/// Outbound frame borrowed from a bus event, so fan-out avoids cloning
/// payloads per connection.
#[derive(Serialize)]
struct OutboundFrame<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

fn wire_log_in(session: &Session, payload: &str) {
    tracing::trace!(
        target: "wire",
        direction = "in",
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        bytes = payload.len(),
        payload,
        "client_frame"
    );
}

fn wire_log_out(session: &Session, frame_type: &str, payload: &str) {
    tracing::trace!(
        target: "wire",
        direction = "out",
        frame_type,
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        bytes = payload.len(),
        payload,
        "server_frame"
    );
}

async fn send_text_logged(
    sender: &mut (impl SinkExt<Message> + Unpin),
    session: &Session,
    frame_type: &str,
    payload: String,
) -> Result<(), ()> {
    wire_log_out(session, frame_type, &payload);
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn send_close_logged(
    sender: &mut (impl SinkExt<Message> + Unpin),
    session: &Session,
    code: u16,
    reason: &str,
) {
    tracing::trace!(
        target: "wire",
        direction = "out",
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        code,
        reason,
        "server_close"
    );
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

/// Drive one authenticated connection from admission to teardown.
pub async fn handle_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (mut sender, receiver) = socket.split();

    // Subscribe before presence registration so nothing published from here
    // on is missed.
    let event_rx = state.event_bus.subscribe();
    let channels = rooms::initial_channels(state.groups.as_ref(), &user_id).await;
    let session = Session::new(user_id, channels);
    state
        .presence
        .connect(&session.user_id, &session.connection_id)
        .await;
    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        "gateway connection established"
    );

    let ready = Ready {
        user_id: session.user_id.clone(),
        connection_id: session.connection_id.clone(),
        channels: session.channels(),
    };
    let sent = match serde_json::to_string(&OutboundFrame {
        event: EVENT_READY,
        data: &ready,
    }) {
        Ok(payload) => send_text_logged(&mut sender, &session, "ready", payload).await,
        Err(e) => {
            tracing::warn!("failed to encode ready frame: {e}");
            Err(())
        }
    };

    let (session, departure) = if sent.is_ok() {
        run_session(&mut sender, receiver, session, &state, event_rx).await
    } else {
        (session, Departure::Closed)
    };

    match departure {
        Departure::Closed => {
            state
                .presence
                .disconnect(&session.user_id, &session.connection_id)
                .await;
        }
        Departure::Shutdown => {
            state
                .presence
                .disconnect_now(&session.user_id, &session.connection_id)
                .await;
        }
    }
}

async fn run_session(
    sender: &mut (impl SinkExt<Message> + Unpin),
    mut receiver: impl StreamExt<Item = Result<Message, axum::Error>> + Unpin,
    mut session: Session,
    state: &AppState,
    mut event_rx: broadcast::Receiver<Arc<ServerEvent>>,
) -> (Session, Departure) {
    let period = state.config.ping_interval;
    let mut ping_interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = state.shutdown.notified();
    tokio::pin!(shutdown);
    let mut departure = Departure::Closed;

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        wire_log_in(&session, text.as_str());
                        let event = match serde_json::from_str::<ClientEvent>(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::debug!(user_id = %session.user_id, "ignoring unrecognised frame: {e}");
                                continue;
                            }
                        };
                        let name = event.name();
                        if let Some(reply) = handle_client_event(state, &mut session, event).await {
                            let payload = match serde_json::to_string(&reply) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    tracing::warn!("failed to encode reply to {name}: {e}");
                                    continue;
                                }
                            };
                            if send_text_logged(sender, &session, name, payload).await.is_err() {
                                break "websocket send error".to_string();
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break "client closed connection".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("websocket receive error: {e}"),
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !session.should_receive_event(&event) {
                            continue;
                        }
                        let payload = match serde_json::to_string(&OutboundFrame {
                            event: &event.event_type,
                            data: &event.payload,
                        }) {
                            Ok(payload) => payload,
                            Err(e) => {
                                tracing::warn!("failed to encode {} frame: {e}", event.event_type);
                                continue;
                            }
                        };
                        if send_text_logged(sender, &session, "dispatch", payload).await.is_err() {
                            break "websocket send error".to_string();
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            user_id = %session.user_id,
                            skipped,
                            "gateway event stream lagged; forcing reconnect"
                        );
                        send_close_logged(
                            sender,
                            &session,
                            CLOSE_TRY_AGAIN_LATER,
                            "Gateway fell behind; reconnect required",
                        )
                        .await;
                        break format!("event stream lagged by {skipped} events");
                    }
                    Err(RecvError::Closed) => break "event stream closed".to_string(),
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "websocket ping send error".to_string();
                }
                state
                    .presence
                    .refresh(&session.user_id, &session.connection_id)
                    .await;
            }
            () = &mut shutdown => {
                send_close_logged(sender, &session, CLOSE_GOING_AWAY, "Server shutting down").await;
                departure = Departure::Shutdown;
                break "server shutdown".to_string();
            }
        }
    };

    tracing::info!(
        user_id = %session.user_id,
        connection_id = %session.connection_id,
        "client disconnected: {disconnect_reason}"
    );
    (session, departure)
}
