use crate::{DbError, DbPool};

pub async fn get_user_group_ids(pool: &DbPool, user_id: &str) -> Result<Vec<String>, DbError> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT group_id FROM group_members WHERE user_id = ?1 ORDER BY group_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn add_member(pool: &DbPool, group_id: &str, user_id: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO group_members (group_id, user_id) VALUES (?1, ?2)
         ON CONFLICT (group_id, user_id) DO NOTHING",
    )
    .bind(group_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_member(pool: &DbPool, group_id: &str, user_id: &str) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}
