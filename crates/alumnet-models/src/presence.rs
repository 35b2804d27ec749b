use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckUserStatus {
    pub user_id: String,
}

/// Payload of `user_status_update`, both for broadcast transitions and for
/// direct replies to `check_user_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub user_id: String,
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl UserStatus {
    pub fn online(user_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            is_online: true,
            last_seen: Some(at),
        }
    }

    pub fn offline(user_id: impl Into<String>, last_seen: Option<DateTime<Utc>>) -> Self {
        Self {
            user_id: user_id.into(),
            is_online: false,
            last_seen,
        }
    }
}
