// Redis-backed KvStore implementation.
// Counters use a small Lua script so INCR and the creation-time EXPIRE are
// one atomic round trip; key scans use cursor-based SCAN to avoid blocking
// the server.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CacheError, InvalidationHandler, KvStore, INVALIDATION_CHANNEL};
use crate::db::RedisPool;

/// INCR + EXPIRE-on-create in one atomic step.
/// ARGV[1] is the TTL in seconds, 0 meaning "no TTL on create".
const INCREMENT_SCRIPT: &str = r#"
    local count = redis.call('INCR', KEYS[1])
    local ttl = tonumber(ARGV[1])
    if count == 1 and ttl > 0 then
        redis.call('EXPIRE', KEYS[1], ttl)
    end
    return count
"#;

pub struct RedisKvStore {
    pool: RedisPool,
    client: redis::Client,
}

impl RedisKvStore {
    pub fn new(pool: RedisPool, redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self { pool, client })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.pool.get_connection().await?;
        match ttl {
            Some(ttl) if ttl.as_secs() > 0 => {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?
            },
            _ => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.pool.get_connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.pool.get_connection().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.pool.get_connection().await?;
        Ok(conn.exists(key).await?)
    }

    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, CacheError> {
        let mut conn = self.pool.get_connection().await?;
        let ttl_secs = ttl_on_create.map(|t| t.as_secs()).unwrap_or(0);

        let count: i64 = redis::Script::new(INCREMENT_SCRIPT)
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn search_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.pool.get_connection().await?;
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (new_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            cursor = new_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.pool.get_connection().await?;
        let updated: i64 = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(updated > 0)
    }

    async fn publish_invalidation(&self, pattern: &str) -> Result<(), CacheError> {
        let mut conn = self.pool.get_connection().await?;
        conn.publish::<_, _, ()>(INVALIDATION_CHANNEL, pattern).await?;
        Ok(())
    }

    fn subscribe_invalidations(&self, handler: InvalidationHandler) {
        let client = self.client.clone();

        tokio::spawn(async move {
            loop {
                let mut pubsub = match client.get_async_pubsub().await {
                    Ok(pubsub) => pubsub,
                    Err(e) => {
                        warn!("Invalidation subscriber connect failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    },
                };

                if let Err(e) = pubsub.subscribe(INVALIDATION_CHANNEL).await {
                    warn!("Invalidation subscribe failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }

                debug!("Subscribed to cache invalidations");
                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    if let Ok(pattern) = msg.get_payload::<String>() {
                        handler(&pattern);
                    }
                }

                warn!("Invalidation subscription ended, reconnecting");
            }
        });
    }
}
