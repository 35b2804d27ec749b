use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateCall {
    pub target_user_id: String,
    pub channel_name: String,
    /// Opaque caller metadata (display name, avatar, call type) forwarded as-is.
    #[serde(default)]
    pub caller_data: serde_json::Value,
}

/// Inbound `answer_call` / `end_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignal {
    pub target_user_id: String,
    pub channel_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    pub caller_id: String,
    pub channel_name: String,
    pub caller_data: serde_json::Value,
}

/// Outbound `call_answered` / `call_ended`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUpdate {
    pub channel_name: String,
}
