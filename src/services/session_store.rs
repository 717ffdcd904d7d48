// Session store: two coordinated KV mappings.
//
//   forward  session:{user_id}:{jti}   -> RefreshTokenRecord (JSON)
//   reverse  tokenindex:{token_hash}   -> forward key
//
// The reverse index turns "which session does this refresh token belong to"
// into a single O(1) lookup instead of a scan over every live session, while
// still locating the forward slot for TTL-preserving updates. Both entries
// carry the same TTL so they expire together.

use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use crate::cache::{get_json, set_json, CacheError, SharedKvStore};
use crate::models::session::RefreshTokenRecord;

const FORWARD_PREFIX: &str = "session";
const REVERSE_PREFIX: &str = "tokenindex";

#[derive(Clone)]
pub struct SessionStore {
    store: SharedKvStore,
}

impl SessionStore {
    pub fn new(store: SharedKvStore) -> Self {
        Self { store }
    }

    pub fn forward_key(user_id: Uuid, jti: &str) -> String {
        format!("{}:{}:{}", FORWARD_PREFIX, user_id, jti)
    }

    pub fn reverse_key(token_hash: &str) -> String {
        format!("{}:{}", REVERSE_PREFIX, token_hash)
    }

    /// Extract (user_id, jti) back out of a forward key
    pub fn parse_forward_key(key: &str) -> Option<(Uuid, String)> {
        let rest = key.strip_prefix("session:")?;
        let (user_part, jti) = rest.split_once(':')?;
        let user_id = Uuid::parse_str(user_part).ok()?;
        Some((user_id, jti.to_string()))
    }

    /// TTL until the record's expiry, floored at one second so a record on
    /// the boundary still lands and immediately ages out
    fn ttl_of(record: &RefreshTokenRecord) -> Duration {
        let remaining = (record.expires_at - Utc::now()).num_seconds().max(1);
        Duration::from_secs(remaining as u64)
    }

    /// Store a fresh session: forward record first, then its reverse entry
    pub async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), CacheError> {
        let ttl = Self::ttl_of(record);
        let forward = Self::forward_key(record.user_id, &record.jti);

        set_json(self.store.as_ref(), &forward, record, Some(ttl)).await?;
        self.store
            .set(&Self::reverse_key(&record.token_hash), forward, Some(ttl))
            .await
    }

    pub async fn get(
        &self,
        user_id: Uuid,
        jti: &str,
    ) -> Result<Option<RefreshTokenRecord>, CacheError> {
        get_json(self.store.as_ref(), &Self::forward_key(user_id, jti)).await
    }

    pub async fn get_by_key(&self, key: &str) -> Result<Option<RefreshTokenRecord>, CacheError> {
        get_json(self.store.as_ref(), key).await
    }

    /// Resolve a token hash to its forward key via the reverse index
    pub async fn find_key_by_token_hash(&self, hash: &str) -> Result<Option<String>, CacheError> {
        self.store.get(&Self::reverse_key(hash)).await
    }

    /// Rotate the session's token in place.
    ///
    /// The forward slot is shared across rotations (same jti), so ordering
    /// is: write the new reverse entry, atomically claim the old reverse
    /// entry, then overwrite the forward record. Exactly one concurrent
    /// rotator can win the claim; the loser backs out its reverse entry.
    /// Returns false when the claim was lost.
    pub async fn rotate(
        &self,
        old_hash: &str,
        new_record: &RefreshTokenRecord,
    ) -> Result<bool, CacheError> {
        let ttl = Self::ttl_of(new_record);
        let forward = Self::forward_key(new_record.user_id, &new_record.jti);
        let new_reverse = Self::reverse_key(&new_record.token_hash);

        self.store
            .set(&new_reverse, forward.clone(), Some(ttl))
            .await?;

        let claimed = self.store.remove(&Self::reverse_key(old_hash)).await?;
        if !claimed {
            self.store.remove(&new_reverse).await?;
            return Ok(false);
        }

        set_json(self.store.as_ref(), &forward, new_record, Some(ttl)).await?;
        Ok(true)
    }

    /// Idempotent revocation: mark the forward record revoked (kept until its
    /// TTL for audit) and drop the reverse entry so the token can no longer
    /// resolve through the O(1) path. Returns whether a live session was
    /// revoked by this call.
    pub async fn revoke(&self, user_id: Uuid, jti: &str) -> Result<bool, CacheError> {
        let forward = Self::forward_key(user_id, jti);

        let mut record: RefreshTokenRecord = match get_json(self.store.as_ref(), &forward).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        let reverse = Self::reverse_key(&record.token_hash);

        if record.revoked {
            // Re-delete the reverse entry in case an earlier revoke died
            // between the two writes
            self.store.remove(&reverse).await?;
            return Ok(false);
        }

        record.revoked = true;
        record.revoked_at = Some(Utc::now());

        let ttl = Self::ttl_of(&record);
        set_json(self.store.as_ref(), &forward, &record, Some(ttl)).await?;
        self.store.remove(&reverse).await?;
        Ok(true)
    }

    /// Revoke every session of a user. Pattern scan, so O(sessions); only
    /// used on the logout-all and admin paths. Publishes an invalidation so
    /// other nodes can drop cached state.
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, CacheError> {
        let pattern = format!("{}:{}:*", FORWARD_PREFIX, user_id);
        let keys = self.store.search_keys(&pattern).await?;

        let mut revoked = 0usize;
        for key in keys {
            if let Some((uid, jti)) = Self::parse_forward_key(&key) {
                if self.revoke(uid, &jti).await? {
                    revoked += 1;
                }
            }
        }

        self.store.publish_invalidation(&pattern).await?;
        Ok(revoked)
    }

    /// All session records of a user (admin/debug surface)
    pub async fn sessions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, CacheError> {
        let pattern = format!("{}:{}:*", FORWARD_PREFIX, user_id);
        let keys = self.store.search_keys(&pattern).await?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.get_by_key(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Liveness check for the session-validation filter: the record must
    /// exist, be unrevoked and unexpired
    pub async fn is_live(&self, user_id: Uuid, jti: &str) -> Result<bool, CacheError> {
        match self.get(user_id, jti).await? {
            Some(record) => Ok(!record.revoked && !record.is_expired_at(Utc::now())),
            None => Ok(false),
        }
    }

    /// Count of live sessions across all users (stats surface)
    pub async fn count_live_sessions(&self) -> Result<usize, CacheError> {
        let keys = self.store.search_keys("session:*").await?;
        let mut live = 0usize;
        for key in keys {
            if let Some(record) = self.get_by_key(&key).await? {
                if !record.revoked && !record.is_expired_at(Utc::now()) {
                    live += 1;
                }
            }
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryKvStore;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(MemoryKvStore::new()))
    }

    fn record(user_id: Uuid, jti: &str, hash: &str) -> RefreshTokenRecord {
        RefreshTokenRecord::new(
            user_id,
            jti.to_string(),
            hash.to_string(),
            Utc::now() + ChronoDuration::days(7),
        )
    }

    #[test]
    fn test_parse_forward_key() {
        let user_id = Uuid::new_v4();
        let key = SessionStore::forward_key(user_id, "some-jti");
        assert_eq!(
            SessionStore::parse_forward_key(&key),
            Some((user_id, "some-jti".to_string()))
        );
        assert_eq!(SessionStore::parse_forward_key("garbage"), None);
    }

    #[tokio::test]
    async fn test_insert_creates_both_indexes() {
        let sessions = store();
        let user_id = Uuid::new_v4();
        let rec = record(user_id, "jti-1", "hash-1");

        sessions.insert(&rec).await.unwrap();

        assert_eq!(sessions.get(user_id, "jti-1").await.unwrap(), Some(rec));
        assert_eq!(
            sessions.find_key_by_token_hash("hash-1").await.unwrap(),
            Some(SessionStore::forward_key(user_id, "jti-1"))
        );
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent_and_drops_reverse() {
        let sessions = store();
        let user_id = Uuid::new_v4();
        sessions.insert(&record(user_id, "jti-1", "hash-1")).await.unwrap();

        assert!(sessions.revoke(user_id, "jti-1").await.unwrap());
        assert!(!sessions.revoke(user_id, "jti-1").await.unwrap());

        let rec = sessions.get(user_id, "jti-1").await.unwrap().unwrap();
        assert!(rec.revoked);
        assert!(rec.revoked_at.is_some());
        assert_eq!(sessions.find_key_by_token_hash("hash-1").await.unwrap(), None);
        assert!(!sessions.is_live(user_id, "jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_swaps_reverse_entry() {
        let sessions = store();
        let user_id = Uuid::new_v4();
        sessions.insert(&record(user_id, "jti-1", "hash-old")).await.unwrap();

        let new_rec = record(user_id, "jti-1", "hash-new");
        assert!(sessions.rotate("hash-old", &new_rec).await.unwrap());

        assert_eq!(sessions.find_key_by_token_hash("hash-old").await.unwrap(), None);
        assert_eq!(
            sessions.find_key_by_token_hash("hash-new").await.unwrap(),
            Some(SessionStore::forward_key(user_id, "jti-1"))
        );
        assert_eq!(
            sessions.get(user_id, "jti-1").await.unwrap().unwrap().token_hash,
            "hash-new"
        );
    }

    #[tokio::test]
    async fn test_rotate_claim_lost() {
        let sessions = store();
        let user_id = Uuid::new_v4();
        sessions.insert(&record(user_id, "jti-1", "hash-old")).await.unwrap();

        let first = record(user_id, "jti-1", "hash-a");
        let second = record(user_id, "jti-1", "hash-b");

        assert!(sessions.rotate("hash-old", &first).await.unwrap());
        // Second rotation against the already-claimed hash loses and backs out
        assert!(!sessions.rotate("hash-old", &second).await.unwrap());
        assert_eq!(sessions.find_key_by_token_hash("hash-b").await.unwrap(), None);
        assert_eq!(
            sessions.get(user_id, "jti-1").await.unwrap().unwrap().token_hash,
            "hash-a"
        );
    }

    #[tokio::test]
    async fn test_revoke_all_counts_only_live() {
        let sessions = store();
        let user_id = Uuid::new_v4();
        sessions.insert(&record(user_id, "jti-1", "hash-1")).await.unwrap();
        sessions.insert(&record(user_id, "jti-2", "hash-2")).await.unwrap();
        sessions.insert(&record(user_id, "jti-3", "hash-3")).await.unwrap();
        sessions.revoke(user_id, "jti-2").await.unwrap();

        // Another user's session must stay untouched
        let other = Uuid::new_v4();
        sessions.insert(&record(other, "jti-x", "hash-x")).await.unwrap();

        assert_eq!(sessions.revoke_all_for_user(user_id).await.unwrap(), 2);
        assert!(sessions.is_live(other, "jti-x").await.unwrap());
    }
}
