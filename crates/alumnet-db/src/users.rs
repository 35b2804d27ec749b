use crate::{datetime_from_db_text, datetime_to_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PresenceRow {
    pub id: String,
    pub is_online: bool,
    pub last_seen: Option<String>,
}

impl PresenceRow {
    pub fn last_seen_at(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        self.last_seen
            .as_deref()
            .map(datetime_from_db_text)
            .transpose()
            .map_err(DbError::from)
    }
}

pub async fn get_presence(pool: &DbPool, user_id: &str) -> Result<Option<PresenceRow>, DbError> {
    let row = sqlx::query_as::<_, PresenceRow>(
        "SELECT id, is_online, last_seen FROM users WHERE id = ?1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_last_seen(pool: &DbPool, user_id: &str) -> Result<Option<DateTime<Utc>>, DbError> {
    match get_presence(pool, user_id).await? {
        Some(row) => row.last_seen_at(),
        None => Ok(None),
    }
}

/// Users are created by the account service; presence writes upsert so a
/// connection racing account creation does not lose its state.
pub async fn set_online(pool: &DbPool, user_id: &str, online: bool) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO users (id, is_online) VALUES (?1, ?2)
         ON CONFLICT (id) DO UPDATE SET is_online = ?2",
    )
    .bind(user_id)
    .bind(online)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_last_seen(
    pool: &DbPool,
    user_id: &str,
    last_seen: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO users (id, last_seen) VALUES (?1, ?2)
         ON CONFLICT (id) DO UPDATE SET last_seen = ?2",
    )
    .bind(user_id)
    .bind(datetime_to_db_text(last_seen))
    .execute(pool)
    .await?;
    Ok(())
}
