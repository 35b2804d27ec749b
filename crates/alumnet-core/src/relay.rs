//! Call signaling. Every message is forwarded to the target's personal
//! channel as-is; no call state is kept and lifecycle order is not checked.

use alumnet_models::call::{CallSignal, CallUpdate, IncomingCall, InitiateCall};
use alumnet_models::gateway::{EVENT_CALL_ANSWERED, EVENT_CALL_ENDED, EVENT_INCOMING_CALL};

use crate::events::EventBus;

pub fn initiate_call(bus: &EventBus, caller: &str, request: InitiateCall) {
    tracing::debug!(
        caller_id = %caller,
        target_id = %request.target_user_id,
        channel = %request.channel_name,
        "relaying call invitation"
    );
    bus.emit_to_identity(
        &request.target_user_id,
        EVENT_INCOMING_CALL,
        IncomingCall {
            caller_id: caller.to_string(),
            channel_name: request.channel_name,
            caller_data: request.caller_data,
        },
    );
}

pub fn answer_call(bus: &EventBus, signal: CallSignal) {
    forward(bus, EVENT_CALL_ANSWERED, signal);
}

pub fn end_call(bus: &EventBus, signal: CallSignal) {
    forward(bus, EVENT_CALL_ENDED, signal);
}

fn forward(bus: &EventBus, event_type: &str, signal: CallSignal) {
    tracing::debug!(target_id = %signal.target_user_id, channel = %signal.channel_name, "relaying {event_type}");
    bus.emit_to_identity(
        &signal.target_user_id,
        event_type,
        CallUpdate {
            channel_name: signal.channel_name,
        },
    );
}
