//! Live connection handles per identity.
//!
//! Two interchangeable backends: Redis sets shared by every server instance,
//! or a process-local map. The choice is made once at startup by
//! [`select_backend`]; the two are never mixed within one deployment.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreError;

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Presence bookkeeping contract. Counts are the number of distinct live
/// handles for the identity after the operation.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Idempotent per handle.
    async fn add_connection(&self, identity: &str, handle: &str) -> usize;
    /// Removing an unknown handle, or from an identity with no connections,
    /// is a no-op.
    async fn remove_connection(&self, identity: &str, handle: &str) -> usize;
    async fn count_for(&self, identity: &str) -> usize;
    /// Extend the lifetime of a still-live handle where the backend expires
    /// entries on its own.
    async fn refresh(&self, _identity: &str, _handle: &str) {}
    fn backend_name(&self) -> &'static str;
}

#[derive(Default)]
pub struct MemoryPresenceStore {
    connections: DashMap<String, HashSet<String>>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, identity: &str, handle: &str) -> usize {
        let mut handles = self.connections.entry(identity.to_string()).or_default();
        handles.insert(handle.to_string());
        handles.len()
    }

    fn remove(&self, identity: &str, handle: &str) -> usize {
        let remaining = match self.connections.get_mut(identity) {
            Some(mut handles) => {
                handles.remove(handle);
                handles.len()
            }
            None => return 0,
        };
        if remaining == 0 {
            self.connections.remove_if(identity, |_, handles| handles.is_empty());
        }
        remaining
    }

    fn count(&self, identity: &str) -> usize {
        self.connections.get(identity).map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn add_connection(&self, identity: &str, handle: &str) -> usize {
        self.add(identity, handle)
    }

    async fn remove_connection(&self, identity: &str, handle: &str) -> usize {
        self.remove(identity, handle)
    }

    async fn count_for(&self, identity: &str) -> usize {
        self.count(identity)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// One Redis set per identity, `<prefix>:<identity>`, whose expiry is pushed
/// forward on every add and refresh so entries left behind by a crashed
/// instance age out on their own.
///
/// The handles owned by this instance are mirrored locally. When a Redis
/// call fails the operation is answered from that mirror and a warning is
/// logged.
pub struct RedisPresenceStore {
    conn: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
    local: MemoryPresenceStore,
}

impl RedisPresenceStore {
    pub async fn connect(
        client: &redis::Client,
        key_prefix: &str,
        ttl_secs: u64,
    ) -> Result<Self, CoreError> {
        let mut conn = tokio::time::timeout(REDIS_CONNECT_TIMEOUT, client.get_connection_manager())
            .await
            .map_err(|_| CoreError::Internal("timed out connecting to redis".into()))??;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.trim_end_matches(':').to_string(),
            ttl_secs: ttl_secs.max(1),
            local: MemoryPresenceStore::new(),
        })
    }

    fn key(&self, identity: &str) -> String {
        format!("{}:{}", self.key_prefix, identity)
    }

    async fn add_and_touch(&self, identity: &str, handle: &str) -> redis::RedisResult<usize> {
        let key = self.key(identity);
        let mut conn = self.conn.clone();
        let (count,): (usize,) = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(&key)
            .arg(handle)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_secs)
            .ignore()
            .cmd("SCARD")
            .arg(&key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn add_connection(&self, identity: &str, handle: &str) -> usize {
        let local = self.local.add(identity, handle);
        match self.add_and_touch(identity, handle).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(user_id = %identity, "redis presence add failed, using local count: {e}");
                local
            }
        }
    }

    async fn remove_connection(&self, identity: &str, handle: &str) -> usize {
        let local = self.local.remove(identity, handle);
        let key = self.key(identity);
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<(usize,)> = redis::pipe()
            .atomic()
            .cmd("SREM")
            .arg(&key)
            .arg(handle)
            .ignore()
            .cmd("SCARD")
            .arg(&key)
            .query_async(&mut conn)
            .await;
        match result {
            Ok((count,)) => count,
            Err(e) => {
                tracing::warn!(user_id = %identity, "redis presence remove failed, using local count: {e}");
                local
            }
        }
    }

    async fn count_for(&self, identity: &str) -> usize {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<usize> = redis::cmd("SCARD")
            .arg(self.key(identity))
            .query_async(&mut conn)
            .await;
        match result {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(user_id = %identity, "redis presence count failed, using local count: {e}");
                self.local.count(identity)
            }
        }
    }

    async fn refresh(&self, identity: &str, handle: &str) {
        if let Err(e) = self.add_and_touch(identity, handle).await {
            tracing::warn!(user_id = %identity, "redis presence refresh failed: {e}");
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[derive(Debug, Clone)]
pub struct PresenceStoreConfig {
    /// `None` (or blank) selects the in-memory backend.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub ttl_secs: u64,
}

/// The presence backend chosen at startup. `redis` is set when the
/// distributed backend is active, so callers can also run the
/// cross-instance event bridge against the same server.
pub struct PresenceBackend {
    pub store: Arc<dyn PresenceStore>,
    pub redis: Option<redis::Client>,
}

impl PresenceBackend {
    pub fn memory() -> Self {
        Self {
            store: Arc::new(MemoryPresenceStore::new()),
            redis: None,
        }
    }
}

pub async fn select_backend(config: &PresenceStoreConfig) -> PresenceBackend {
    let Some(url) = config
        .redis_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
    else {
        tracing::info!("presence: using in-memory backend (single instance)");
        return PresenceBackend::memory();
    };

    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("presence: invalid redis url, falling back to in-memory backend: {e}");
            return PresenceBackend::memory();
        }
    };

    match RedisPresenceStore::connect(&client, &config.key_prefix, config.ttl_secs).await {
        Ok(store) => {
            tracing::info!(ttl_secs = config.ttl_secs, "presence: using redis backend");
            PresenceBackend {
                store: Arc::new(store),
                redis: Some(client),
            }
        }
        Err(e) => {
            tracing::warn!("presence: redis unavailable, falling back to in-memory backend: {e}");
            PresenceBackend::memory()
        }
    }
}
