use serde::{Deserialize, Serialize};

pub const STATUS_DELIVERED: &str = "delivered";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkMessagesRead {
    pub chat_id: String,
    pub message_ids: Vec<String>,
    /// Claimed reader. The gateway always uses the authenticated identity.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDelivered {
    pub message_id: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadUpdate {
    pub chat_id: String,
    pub message_ids: Vec<String>,
    pub reader_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatusUpdate {
    pub message_id: String,
    pub status: String,
    pub chat_id: String,
}
