// In-memory KvStore used by the test suites and local development without
// Redis. TTLs are enforced lazily on access; invalidation handlers fire
// synchronously on publish.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{CacheError, InvalidationHandler, KvStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
    handlers: Mutex<Vec<InvalidationHandler>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(entries: &mut HashMap<String, Entry>) {
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
    }
}

/// Minimal glob matcher: `*` matches any run of characters
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == candidate;
    }

    let mut remainder = candidate;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match remainder.strip_prefix(part) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if i == parts.len() - 1 && !pattern.ends_with('*') {
            return remainder.ends_with(part);
        } else {
            match remainder.find(part) {
                Some(pos) => remainder = &remainder[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        Ok(entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        Ok(entries.contains_key(key))
    }

    async fn increment(
        &self,
        key: &str,
        ttl_on_create: Option<Duration>,
    ) -> Result<i64, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);

        match entries.get_mut(key) {
            Some(entry) => {
                let current: i64 = entry
                    .value
                    .parse()
                    .map_err(|_| CacheError::Serialization(format!("non-numeric counter {}", key)))?;
                entry.value = (current + 1).to_string();
                Ok(current + 1)
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: ttl_on_create.map(|t| Instant::now() + t),
                    },
                );
                Ok(1)
            },
        }
    }

    async fn search_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        Ok(entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().unwrap();
        Self::purge_expired(&mut entries);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn publish_invalidation(&self, pattern: &str) -> Result<(), CacheError> {
        let handlers = self.handlers.lock().unwrap();
        for handler in handlers.iter() {
            handler(pattern);
        }
        Ok(())
    }

    fn subscribe_invalidations(&self, handler: InvalidationHandler) {
        self.handlers.lock().unwrap().push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryKvStore::new();
        store.set("k", "v".to_string(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.remove("k").await.unwrap());
        assert!(!store.remove("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryKvStore::new();
        store
            .set("k", "v".to_string(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_creates_then_counts() {
        let store = MemoryKvStore::new();
        assert_eq!(store.increment("c", None).await.unwrap(), 1);
        assert_eq!(store.increment("c", None).await.unwrap(), 2);
        assert_eq!(store.increment("c", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_increment_ttl_applies_only_on_create() {
        let store = MemoryKvStore::new();
        store
            .increment("c", Some(Duration::from_millis(40)))
            .await
            .unwrap();
        // Subsequent increments must not extend the original window
        tokio::time::sleep(Duration::from_millis(25)).await;
        store
            .increment("c", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The first TTL has elapsed; the counter starts over
        assert_eq!(store.increment("c", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refresh_extends_ttl() {
        let store = MemoryKvStore::new();
        store
            .set("k", "v".to_string(), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.refresh("k", Duration::from_secs(60)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        assert!(!store.refresh("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_keys_glob() {
        let store = MemoryKvStore::new();
        store.set("session:u1:a", "1".into(), None).await.unwrap();
        store.set("session:u1:b", "1".into(), None).await.unwrap();
        store.set("session:u2:a", "1".into(), None).await.unwrap();

        let mut keys = store.search_keys("session:u1:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session:u1:a", "session:u1:b"]);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let store = MemoryKvStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        store.subscribe_invalidations(Arc::new(move |_pattern| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }));

        store.publish_invalidation("session:u1:*").await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("session:*", "session:u1:a"));
        assert!(glob_match("*:penalty", "throttle:auth:1.2.3.4:penalty"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
        assert!(!glob_match("session:u1:*", "session:u2:a"));
    }
}
