use crate::{datetime_to_db_text, DbError, DbPool};
use chrono::Utc;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub status: String,
    pub created_at: String,
}

pub async fn create_message(
    pool: &DbPool,
    id: &str,
    chat_id: &str,
    sender_id: &str,
) -> Result<MessageRow, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (id, chat_id, sender_id)
         VALUES (?1, ?2, ?3)
         RETURNING id, chat_id, sender_id, status, created_at",
    )
    .bind(id)
    .bind(chat_id)
    .bind(sender_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn add_participant(pool: &DbPool, chat_id: &str, user_id: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO conversation_participants (chat_id, user_id) VALUES (?1, ?2)
         ON CONFLICT (chat_id, user_id) DO NOTHING",
    )
    .bind(chat_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_participants(pool: &DbPool, chat_id: &str) -> Result<Vec<String>, DbError> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT user_id FROM conversation_participants WHERE chat_id = ?1 ORDER BY user_id",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Record `reader` as having read each message of `chat_id`.
///
/// Ids that do not belong to the chat are skipped. Messages the reader sent
/// themselves get a read receipt row but keep their status. Returns how many
/// receipts were newly written.
pub async fn mark_read(
    pool: &DbPool,
    message_ids: &[String],
    chat_id: &str,
    reader_id: &str,
) -> Result<u64, DbError> {
    let read_at = datetime_to_db_text(Utc::now());
    let mut tx = pool.begin().await?;
    let mut written = 0;

    for message_id in message_ids {
        let inserted = sqlx::query(
            "INSERT INTO message_reads (message_id, user_id, read_at)
             SELECT id, ?2, ?3 FROM messages WHERE id = ?1 AND chat_id = ?4
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(message_id)
        .bind(reader_id)
        .bind(&read_at)
        .bind(chat_id)
        .execute(&mut *tx)
        .await?;
        written += inserted.rows_affected();

        sqlx::query(
            "UPDATE messages SET status = 'read'
             WHERE id = ?1 AND chat_id = ?2 AND sender_id != ?3",
        )
        .bind(message_id)
        .bind(chat_id)
        .bind(reader_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(written)
}

/// Promote a message from `sent` to `delivered`. A message that is already
/// delivered or read is returned unchanged; `None` when it does not exist.
pub async fn mark_delivered(pool: &DbPool, message_id: &str) -> Result<Option<MessageRow>, DbError> {
    sqlx::query("UPDATE messages SET status = 'delivered' WHERE id = ?1 AND status = 'sent'")
        .bind(message_id)
        .execute(pool)
        .await?;

    let row = sqlx::query_as::<_, MessageRow>(
        "SELECT id, chat_id, sender_id, status, created_at FROM messages WHERE id = ?1",
    )
    .bind(message_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_read_by(pool: &DbPool, message_id: &str) -> Result<Vec<String>, DbError> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT user_id FROM message_reads WHERE message_id = ?1 ORDER BY user_id",
    )
    .bind(message_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;

    #[tokio::test]
    async fn mark_read_writes_receipts_for_messages_in_the_chat() {
        let pool = test_pool().await;
        create_message(&pool, "m1", "c1", "alice").await.unwrap();
        create_message(&pool, "m2", "c1", "bob").await.unwrap();
        create_message(&pool, "m3", "other", "alice").await.unwrap();

        let ids = vec!["m1".to_string(), "m2".to_string(), "m3".to_string()];
        let written = mark_read(&pool, &ids, "c1", "bob").await.unwrap();
        assert_eq!(written, 2);
        // Second pass is idempotent.
        assert_eq!(mark_read(&pool, &ids, "c1", "bob").await.unwrap(), 0);

        assert_eq!(get_read_by(&pool, "m1").await.unwrap(), vec!["bob"]);
        assert!(get_read_by(&pool, "m3").await.unwrap().is_empty());

        let m1 = mark_delivered(&pool, "m1").await.unwrap().expect("m1");
        assert_eq!(m1.status, "read");
        // The reader's own message was not flipped to read.
        let m2 = mark_delivered(&pool, "m2").await.unwrap().expect("m2");
        assert_eq!(m2.status, "delivered");
    }

    #[tokio::test]
    async fn mark_delivered_promotes_sent_messages() {
        let pool = test_pool().await;
        create_message(&pool, "m1", "c1", "alice").await.unwrap();
        let row = mark_delivered(&pool, "m1").await.unwrap().expect("row");
        assert_eq!(row.status, "delivered");
        assert_eq!(row.sender_id, "alice");
        assert!(mark_delivered(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn participants_are_listed_per_chat() {
        let pool = test_pool().await;
        add_participant(&pool, "c1", "bob").await.unwrap();
        add_participant(&pool, "c1", "alice").await.unwrap();
        add_participant(&pool, "c2", "carol").await.unwrap();
        assert_eq!(get_participants(&pool, "c1").await.unwrap(), vec!["alice", "bob"]);
    }
}
