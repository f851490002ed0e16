//! Server-side sessions: storage backends, per-session locking and key rotation.

use crate::{config::AppConfig, errors::ServiceError, models::Cart};
use dashmap::DashMap;
use rand::{distributions::Alphanumeric, Rng};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

pub const SESSION_KEY_LEN: usize = 32;

/// Lock table size above which idle entries are swept on the next acquire
const LOCK_SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Session operation failed: {0}")]
    OperationFailed(String),
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        ServiceError::SessionError(err.to_string())
    }
}

/// Everything kept for one visitor between requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub cart: Cart,
    #[serde(default)]
    pub account_id: Option<i32>,
    /// Set by a login without "remember me"; the cookie then carries no Max-Age.
    #[serde(default)]
    pub expire_at_browser_close: bool,
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<SessionData>, SessionError>;
    async fn save(&self, key: &str, data: &SessionData, ttl: Duration) -> Result<(), SessionError>;
    async fn delete(&self, key: &str) -> Result<(), SessionError>;
    async fn health(&self) -> Result<(), SessionError>;
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct StoredSession {
    payload: String,
    expires_at: Instant,
}

/// Process-local store. Expired entries are dropped when next touched.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    entries: Arc<DashMap<String, StoredSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, key: &str) -> Result<Option<SessionData>, SessionError> {
        let payload = match self.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => entry.payload.clone(),
            Some(entry) => {
                drop(entry);
                self.entries.remove(key);
                debug!("Dropped expired session");
                return Ok(None);
            }
            None => return Ok(None),
        };
        Ok(Some(serde_json::from_str(&payload)?))
    }

    async fn save(&self, key: &str, data: &SessionData, ttl: Duration) -> Result<(), SessionError> {
        let payload = serde_json::to_string(data)?;
        self.entries.insert(
            key.to_string(),
            StoredSession {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn health(&self) -> Result<(), SessionError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}

/// Redis-backed store; sessions are JSON strings under `{namespace}:{key}` with SETEX expiry.
#[derive(Clone)]
pub struct RedisSessionStore {
    client: Arc<redis::Client>,
    namespace: String,
}

impl RedisSessionStore {
    pub fn new(redis_url: &str, namespace: impl Into<String>) -> Result<Self, SessionError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client: Arc::new(client),
            namespace: namespace.into(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait::async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, key: &str) -> Result<Option<SessionData>, SessionError> {
        let mut conn = self.client.get_async_connection().await?;
        let payload: Option<String> = conn.get(self.namespaced(key)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(SessionError::from))
            .transpose()
    }

    async fn save(&self, key: &str, data: &SessionData, ttl: Duration) -> Result<(), SessionError> {
        let payload = serde_json::to_string(data)?;
        let mut conn = self.client.get_async_connection().await?;
        let secs = usize::try_from(ttl.as_secs().max(1)).unwrap_or(usize::MAX);
        conn.set_ex::<_, _, ()>(self.namespaced(key), payload, secs)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), SessionError> {
        let mut conn = self.client.get_async_connection().await?;
        conn.del::<_, ()>(self.namespaced(key)).await?;
        Ok(())
    }

    async fn health(&self) -> Result<(), SessionError> {
        let mut conn = self.client.get_async_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(SessionError::OperationFailed(format!(
                "unexpected PING reply: {}",
                pong
            )))
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// Per-session async mutexes. Holding the guard serializes cart mutations and checkout
/// for that session.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        if self.locks.len() > LOCK_SWEEP_THRESHOLD {
            self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Front door to the session store used by services.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    locks: Arc<SessionLocks>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration) -> Self {
        Self {
            store,
            locks: Arc::new(SessionLocks::new()),
            ttl,
        }
    }

    /// Picks the backend named by `session_backend`.
    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let store: Arc<dyn SessionStore> = match config.session_backend.as_str() {
            "redis" => {
                info!("Using Redis session store");
                Arc::new(RedisSessionStore::new(
                    &config.redis_url,
                    config.session_namespace.clone(),
                )?)
            }
            _ => {
                info!("Using in-memory session store");
                Arc::new(InMemorySessionStore::new())
            }
        };
        Ok(Self::new(store, config.session_ttl()))
    }

    pub fn generate_key() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_KEY_LEN)
            .map(char::from)
            .collect()
    }

    /// Accepts only keys shaped like the ones `generate_key` produces.
    pub fn is_well_formed_key(key: &str) -> bool {
        key.len() == SESSION_KEY_LEN && key.bytes().all(|b| b.is_ascii_alphanumeric())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.locks.acquire(key).await
    }

    /// Loads the session, or an empty one when the key is unknown or expired.
    pub async fn load(&self, key: &str) -> Result<SessionData, ServiceError> {
        Ok(self.store.load(key).await?.unwrap_or_default())
    }

    pub async fn save(&self, key: &str, data: &SessionData) -> Result<(), ServiceError> {
        self.store.save(key, data, self.ttl).await?;
        Ok(())
    }

    /// Moves `data` to a fresh key and drops the old one. Returns the new key.
    #[instrument(skip(self, data))]
    pub async fn cycle_key(&self, old_key: &str, data: &SessionData) -> Result<String, ServiceError> {
        let new_key = Self::generate_key();
        self.store.save(&new_key, data, self.ttl).await?;
        if let Err(e) = self.store.delete(old_key).await {
            warn!("Failed to delete rotated session: {}", e);
        }
        Ok(new_key)
    }

    /// Removes all session state.
    pub async fn flush(&self, key: &str) -> Result<(), ServiceError> {
        self.store.delete(key).await?;
        Ok(())
    }

    pub async fn health(&self) -> Result<(), ServiceError> {
        self.store.health().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductId;

    fn data_with_item() -> SessionData {
        let mut data = SessionData::default();
        data.cart.add(ProductId::new(3).unwrap());
        data
    }

    #[tokio::test]
    async fn in_memory_round_trip_and_delete() {
        let store = InMemorySessionStore::new();
        let data = data_with_item();
        store.save("k", &data, Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), Some(data));

        store.delete("k").await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_memory_expires_lazily() {
        let store = InMemorySessionStore::new();
        store
            .save("k", &data_with_item(), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.load("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn cycle_key_keeps_data_and_drops_old_key() {
        let manager = SessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            Duration::from_secs(60),
        );
        let old = SessionManager::generate_key();
        let data = data_with_item();
        manager.save(&old, &data).await.unwrap();

        let new = manager.cycle_key(&old, &data).await.unwrap();
        assert_ne!(new, old);
        assert_eq!(manager.load(&new).await.unwrap(), data);
        assert_eq!(manager.load(&old).await.unwrap(), SessionData::default());
    }

    #[test]
    fn generated_keys_are_well_formed() {
        let key = SessionManager::generate_key();
        assert!(SessionManager::is_well_formed_key(&key));
        assert!(!SessionManager::is_well_formed_key("short"));
        assert!(!SessionManager::is_well_formed_key(&"x;".repeat(16)));
    }

    #[tokio::test]
    async fn locks_serialize_the_same_key() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.acquire("a").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.acquire("a").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        // a different key never waits
        let _b = locks.acquire("b").await;
    }

    #[test]
    fn session_data_tolerates_missing_fields() {
        let data: SessionData = serde_json::from_str("{}").unwrap();
        assert!(data.cart.is_empty());
        assert!(data.account_id.is_none());
    }
}
