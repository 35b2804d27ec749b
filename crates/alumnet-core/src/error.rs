use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("database error: {0}")]
    Database(#[from] alumnet_db::DbError),
    #[error("presence backend error: {0}")]
    Presence(#[from] redis::RedisError),
    #[error("internal error: {0}")]
    Internal(String),
}
