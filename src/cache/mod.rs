// Key-value cache contract backing sessions, throttling, and one-time tokens.
// Production uses Redis; tests run against the in-memory implementation.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryKvStore;
pub use redis_store::RedisKvStore;

/// Pub/sub channel for cross-node cache invalidation
pub const INVALIDATION_CHANNEL: &str = "keygate:invalidate";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Callback invoked for every invalidation pattern published in the cluster
pub type InvalidationHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Typed key-value store with TTLs, atomic counters, and best-effort pub/sub.
///
/// Callers surface `CacheError::Unavailable` instead of falling back to stale
/// state; sessions and throttle counters must never be served from guesses.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store a value, optionally with a TTL
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Fetch a value
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Delete a key; returns whether it existed
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    /// Check key existence without reading the value
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomically increment a counter. `ttl_on_create` is applied only when
    /// the increment creates the key; an existing TTL is preserved.
    async fn increment(&self, key: &str, ttl_on_create: Option<Duration>)
        -> Result<i64, CacheError>;

    /// Non-blocking scan for keys matching a glob pattern (`*` wildcard)
    async fn search_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Extend a key's TTL without rewriting the value (sliding expiration).
    /// Returns false if the key does not exist.
    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Best-effort broadcast of an invalidation pattern to all nodes
    async fn publish_invalidation(&self, pattern: &str) -> Result<(), CacheError>;

    /// Register a handler for invalidation broadcasts. Handlers may fire on
    /// any node in the cluster.
    fn subscribe_invalidations(&self, handler: InvalidationHandler);
}

/// Shared handle used throughout the service layer
pub type SharedKvStore = Arc<dyn KvStore>;

/// Fetch and deserialize a JSON value
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CacheError::Serialization(e.to_string())),
        None => Ok(None),
    }
}

/// Serialize and store a JSON value
pub async fn set_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    store.set(key, raw, ttl).await
}
