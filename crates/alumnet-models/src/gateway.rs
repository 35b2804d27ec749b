use serde::{Deserialize, Serialize};

use crate::call::{CallSignal, InitiateCall};
use crate::message::{MarkMessagesRead, MessageDelivered};
use crate::presence::CheckUserStatus;

// Client -> Server events
pub const EVENT_CHECK_USER_STATUS: &str = "check_user_status";
pub const EVENT_MARK_MESSAGES_READ: &str = "mark_messages_read";
pub const EVENT_MESSAGE_DELIVERED: &str = "message_delivered";
pub const EVENT_INITIATE_CALL: &str = "initiate_call";
pub const EVENT_ANSWER_CALL: &str = "answer_call";
pub const EVENT_END_CALL: &str = "end_call";
pub const EVENT_JOIN_ROOM: &str = "join_room";
pub const EVENT_LEAVE_ROOM: &str = "leave_room";

// Server -> Client events
pub const EVENT_READY: &str = "ready";
pub const EVENT_USER_STATUS_UPDATE: &str = "user_status_update";
pub const EVENT_MESSAGES_READ_UPDATE: &str = "messages_read_update";
pub const EVENT_MESSAGE_STATUS_UPDATE: &str = "message_status_update";
pub const EVENT_INCOMING_CALL: &str = "incoming_call";
pub const EVENT_CALL_ANSWERED: &str = "call_answered";
pub const EVENT_CALL_ENDED: &str = "call_ended";

/// A single text frame on the gateway socket, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl GatewayFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Every inbound event the gateway understands.
///
/// Deserializes straight from a [`GatewayFrame`]-shaped JSON object; frames
/// naming any other event fail to parse and are dropped by the gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    CheckUserStatus(CheckUserStatus),
    MarkMessagesRead(MarkMessagesRead),
    MessageDelivered(MessageDelivered),
    InitiateCall(InitiateCall),
    AnswerCall(CallSignal),
    EndCall(CallSignal),
    JoinRoom(RoomRequest),
    LeaveRoom(RoomRequest),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckUserStatus(_) => EVENT_CHECK_USER_STATUS,
            Self::MarkMessagesRead(_) => EVENT_MARK_MESSAGES_READ,
            Self::MessageDelivered(_) => EVENT_MESSAGE_DELIVERED,
            Self::InitiateCall(_) => EVENT_INITIATE_CALL,
            Self::AnswerCall(_) => EVENT_ANSWER_CALL,
            Self::EndCall(_) => EVENT_END_CALL,
            Self::JoinRoom(_) => EVENT_JOIN_ROOM,
            Self::LeaveRoom(_) => EVENT_LEAVE_ROOM,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRequest {
    pub room: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ready {
    pub user_id: String,
    pub connection_id: String,
    pub channels: Vec<String>,
}
