//! Data-layer collaborators the realtime core calls into.
//!
//! The gateway only depends on these traits. [`SqlDirectory`] is the
//! production implementation over the shared database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use alumnet_db::DbPool;

/// Persisted side of presence transitions.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn last_seen(&self, identity: &str) -> Result<Option<DateTime<Utc>>, CoreError>;
    async fn set_online(&self, identity: &str, online: bool) -> Result<(), CoreError>;
    async fn set_last_seen(&self, identity: &str, at: DateTime<Utc>) -> Result<(), CoreError>;
}

#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn groups_containing(&self, identity: &str) -> Result<Vec<String>, CoreError>;
}

/// A message after a delivery acknowledgement was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn mark_read(
        &self,
        message_ids: &[String],
        chat_id: &str,
        reader: &str,
    ) -> Result<(), CoreError>;
    async fn mark_delivered(&self, message_id: &str) -> Result<Option<DeliveredMessage>, CoreError>;
    /// Conversation lookup: every identity taking part in `chat_id`.
    async fn participants(&self, chat_id: &str) -> Result<Vec<String>, CoreError>;
}

#[derive(Clone)]
pub struct SqlDirectory {
    pool: DbPool,
}

impl SqlDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for SqlDirectory {
    async fn last_seen(&self, identity: &str) -> Result<Option<DateTime<Utc>>, CoreError> {
        Ok(alumnet_db::users::get_last_seen(&self.pool, identity).await?)
    }

    async fn set_online(&self, identity: &str, online: bool) -> Result<(), CoreError> {
        Ok(alumnet_db::users::set_online(&self.pool, identity, online).await?)
    }

    async fn set_last_seen(&self, identity: &str, at: DateTime<Utc>) -> Result<(), CoreError> {
        Ok(alumnet_db::users::set_last_seen(&self.pool, identity, at).await?)
    }
}

#[async_trait]
impl GroupDirectory for SqlDirectory {
    async fn groups_containing(&self, identity: &str) -> Result<Vec<String>, CoreError> {
        Ok(alumnet_db::groups::get_user_group_ids(&self.pool, identity).await?)
    }
}

#[async_trait]
impl MessageStore for SqlDirectory {
    async fn mark_read(
        &self,
        message_ids: &[String],
        chat_id: &str,
        reader: &str,
    ) -> Result<(), CoreError> {
        let written =
            alumnet_db::messages::mark_read(&self.pool, message_ids, chat_id, reader).await?;
        tracing::debug!(chat_id, reader, written, "read receipts stored");
        Ok(())
    }

    async fn mark_delivered(&self, message_id: &str) -> Result<Option<DeliveredMessage>, CoreError> {
        let row = alumnet_db::messages::mark_delivered(&self.pool, message_id).await?;
        Ok(row.map(|m| DeliveredMessage {
            message_id: m.id,
            chat_id: m.chat_id,
            sender_id: m.sender_id,
        }))
    }

    async fn participants(&self, chat_id: &str) -> Result<Vec<String>, CoreError> {
        Ok(alumnet_db::messages::get_participants(&self.pool, chat_id).await?)
    }
}
