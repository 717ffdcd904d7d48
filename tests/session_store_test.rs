// Session store invariants: every live forward record has exactly one
// reverse entry, and revocation/rotation removes the stale entry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use keygate_backend::cache::{KvStore, MemoryKvStore};
use keygate_backend::models::session::RefreshTokenRecord;
use keygate_backend::services::session_store::SessionStore;
use keygate_backend::utils::hash_token;

fn setup() -> (Arc<MemoryKvStore>, SessionStore) {
    let store = Arc::new(MemoryKvStore::new());
    (store.clone(), SessionStore::new(store))
}

fn record_for(user_id: Uuid, jti: &str, token: &str) -> RefreshTokenRecord {
    RefreshTokenRecord::new(
        user_id,
        jti.to_string(),
        hash_token(token),
        Utc::now() + Duration::days(7),
    )
}

#[tokio::test]
async fn every_live_record_has_exactly_one_reverse_entry() {
    let (kv, sessions) = setup();
    let user_id = Uuid::new_v4();

    for i in 0..4 {
        let token = format!("opaque-token-{}", i);
        sessions
            .insert(&record_for(user_id, &format!("jti-{}", i), &token))
            .await
            .unwrap();
    }

    let forward_keys = kv.search_keys("session:*").await.unwrap();
    let reverse_keys = kv.search_keys("tokenindex:*").await.unwrap();
    assert_eq!(forward_keys.len(), 4);
    assert_eq!(reverse_keys.len(), 4);

    // Each reverse entry points at a distinct live forward key
    let mut targets = Vec::new();
    for key in reverse_keys {
        let target = kv.get(&key).await.unwrap().unwrap();
        assert!(forward_keys.contains(&target));
        targets.push(target);
    }
    targets.sort();
    targets.dedup();
    assert_eq!(targets.len(), 4);
}

#[tokio::test]
async fn revocation_removes_reverse_entry_but_keeps_record() {
    let (kv, sessions) = setup();
    let user_id = Uuid::new_v4();

    sessions
        .insert(&record_for(user_id, "jti-1", "opaque-token"))
        .await
        .unwrap();
    assert!(sessions.revoke(user_id, "jti-1").await.unwrap());

    // Record retained (audit until TTL), reverse gone
    let record = sessions.get(user_id, "jti-1").await.unwrap().unwrap();
    assert!(record.revoked);
    assert_eq!(
        sessions
            .find_key_by_token_hash(&hash_token("opaque-token"))
            .await
            .unwrap(),
        None
    );
    assert!(kv.search_keys("tokenindex:*").await.unwrap().is_empty());
}

#[tokio::test]
async fn rotation_leaves_no_stale_reverse_entries() {
    let (kv, sessions) = setup();
    let user_id = Uuid::new_v4();

    sessions
        .insert(&record_for(user_id, "jti-1", "token-v1"))
        .await
        .unwrap();

    for version in 2..6 {
        let old_hash = hash_token(&format!("token-v{}", version - 1));
        let next = record_for(user_id, "jti-1", &format!("token-v{}", version));
        assert!(sessions.rotate(&old_hash, &next).await.unwrap());
    }

    // One forward slot, one reverse entry, pointing at the latest hash
    assert_eq!(kv.search_keys("session:*").await.unwrap().len(), 1);
    let reverse_keys = kv.search_keys("tokenindex:*").await.unwrap();
    assert_eq!(reverse_keys.len(), 1);
    assert_eq!(
        reverse_keys[0],
        format!("tokenindex:{}", hash_token("token-v5"))
    );
}

#[tokio::test]
async fn bulk_revocation_is_scoped_to_one_user() {
    let (_kv, sessions) = setup();
    let victim = Uuid::new_v4();
    let bystander = Uuid::new_v4();

    sessions.insert(&record_for(victim, "jti-a", "tok-a")).await.unwrap();
    sessions.insert(&record_for(victim, "jti-b", "tok-b")).await.unwrap();
    sessions.insert(&record_for(bystander, "jti-c", "tok-c")).await.unwrap();

    assert_eq!(sessions.revoke_all_for_user(victim).await.unwrap(), 2);

    assert!(!sessions.is_live(victim, "jti-a").await.unwrap());
    assert!(!sessions.is_live(victim, "jti-b").await.unwrap());
    assert!(sessions.is_live(bystander, "jti-c").await.unwrap());
}
