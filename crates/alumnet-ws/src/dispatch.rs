use alumnet_core::{receipts, relay, AppState};
use alumnet_models::gateway::{ClientEvent, GatewayFrame, EVENT_USER_STATUS_UPDATE};

use crate::session::Session;

/// Handle one inbound event for `session`. Returns the frame to send back
/// on the same connection, if the event has a direct reply.
pub async fn handle_client_event(
    state: &AppState,
    session: &mut Session,
    event: ClientEvent,
) -> Option<GatewayFrame> {
    match event {
        ClientEvent::CheckUserStatus(query) => {
            let status = state.presence.status(&query.user_id).await;
            match serde_json::to_value(status) {
                Ok(data) => Some(GatewayFrame::new(EVENT_USER_STATUS_UPDATE, data)),
                Err(e) => {
                    tracing::warn!("failed to encode status reply: {e}");
                    None
                }
            }
        }
        ClientEvent::MarkMessagesRead(request) => {
            receipts::mark_messages_read(
                state.messages.as_ref(),
                &state.event_bus,
                &session.user_id,
                request,
            )
            .await;
            None
        }
        ClientEvent::MessageDelivered(request) => {
            receipts::message_delivered(
                state.messages.as_ref(),
                &state.event_bus,
                &session.user_id,
                request,
            )
            .await;
            None
        }
        ClientEvent::InitiateCall(request) => {
            relay::initiate_call(&state.event_bus, &session.user_id, request);
            None
        }
        ClientEvent::AnswerCall(signal) => {
            relay::answer_call(&state.event_bus, signal);
            None
        }
        ClientEvent::EndCall(signal) => {
            relay::end_call(&state.event_bus, signal);
            None
        }
        ClientEvent::JoinRoom(request) => {
            if session.join_room(&request.room) {
                tracing::debug!(user_id = %session.user_id, room = %request.room, "joined room");
            }
            None
        }
        ClientEvent::LeaveRoom(request) => {
            if session.leave_room(&request.room) {
                tracing::debug!(user_id = %session.user_id, room = %request.room, "left room");
            }
            None
        }
    }
}
