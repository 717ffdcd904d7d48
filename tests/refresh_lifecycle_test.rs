// Refresh-token lifecycle: rotation, reuse rejection, bulk revocation.
// Runs against the in-memory KV store; no external services required.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use keygate_backend::cache::MemoryKvStore;
use keygate_backend::models::user::{User, UserRole, UserStatus};
use keygate_backend::services::session_store::SessionStore;
use keygate_backend::services::token::{TokenError, TokenService, TokenServiceConfig};

fn token_service() -> TokenService {
    let sessions = SessionStore::new(Arc::new(MemoryKvStore::new()));
    TokenService::new(
        TokenServiceConfig {
            secret: "integration-test-secret-integration-test-secret-integration-test!".to_string(),
            issuer: "keygate-test".to_string(),
            audience: "keygate-test-clients".to_string(),
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 7 * 86_400,
        },
        sessions,
        None,
    )
}

fn active_user() -> User {
    User {
        id: Uuid::new_v4(),
        username: "testuser".to_string(),
        email: "testuser@example.com".to_string(),
        password_hash: "irrelevant".to_string(),
        role: UserRole::User.as_str().to_string(),
        status: UserStatus::Active.as_str().to_string(),
        created_at: Utc::now(),
        updated_at: None,
        verified_at: Some(Utc::now()),
        last_login: None,
        blocked_at: None,
        notify_expiry: true,
        notify_activity: true,
        notify_announcements: false,
    }
}

#[tokio::test]
async fn reused_refresh_token_is_rejected() {
    let service = token_service();
    let user = active_user();

    let pair = service.issue_session(&user).await.unwrap();

    // First rotation succeeds
    let (_, second_refresh) = service.rotate_refresh(&pair.refresh_token).await.unwrap();

    // Presenting the original token again fails
    let err = service.rotate_refresh(&pair.refresh_token).await.unwrap_err();
    assert!(matches!(err, TokenError::NotFound | TokenError::Revoked));

    // The rotated token keeps working exactly once
    let (_, third_refresh) = service.rotate_refresh(&second_refresh).await.unwrap();
    let err = service.rotate_refresh(&second_refresh).await.unwrap_err();
    assert!(matches!(err, TokenError::NotFound | TokenError::Revoked));

    assert!(service.validate_refresh(&third_refresh).await.unwrap());
}

#[tokio::test]
async fn session_jti_is_stable_across_rotations() {
    let service = token_service();
    let user = active_user();

    let pair = service.issue_session(&user).await.unwrap();
    let claims = service.validate_access(&pair.access_token).unwrap();

    let mut refresh = pair.refresh_token;
    for _ in 0..5 {
        let (record, next) = service.rotate_refresh(&refresh).await.unwrap();
        assert_eq!(record.jti, claims.jti);
        refresh = next;
    }

    // The access token's session is still live after all rotations
    assert!(service.sessions().is_live(user.id, &claims.jti).await.unwrap());
}

#[tokio::test]
async fn revoke_all_invalidates_every_session() {
    let service = token_service();
    let user = active_user();

    // Three devices, three sessions
    let pairs = vec![
        service.issue_session(&user).await.unwrap(),
        service.issue_session(&user).await.unwrap(),
        service.issue_session(&user).await.unwrap(),
    ];

    let revoked = service.revoke_all_sessions(user.id).await.unwrap();
    assert_eq!(revoked, 3);

    for pair in &pairs {
        assert!(!service.validate_refresh(&pair.refresh_token).await.unwrap());
        let claims = service.validate_access(&pair.access_token).unwrap();
        // Access tokens still verify cryptographically but the session
        // filter sees them as dead
        assert!(!service.sessions().is_live(user.id, &claims.jti).await.unwrap());
    }

    // Idempotent: nothing left to revoke
    assert_eq!(service.revoke_all_sessions(user.id).await.unwrap(), 0);
}

#[tokio::test]
async fn presented_cookie_revocation_prevents_session_stacking() {
    let service = token_service();
    let user = active_user();

    // Browser logs in, then logs in again presenting its old refresh cookie
    let first = service.issue_session(&user).await.unwrap();
    service.revoke_by_refresh_token(&first.refresh_token).await.unwrap();
    let second = service.issue_session(&user).await.unwrap();

    assert!(!service.validate_refresh(&first.refresh_token).await.unwrap());
    assert!(service.validate_refresh(&second.refresh_token).await.unwrap());

    // Exactly one live session remains
    let live = service
        .sessions()
        .sessions_for_user(user.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| !r.revoked)
        .count();
    assert_eq!(live, 1);
}

#[tokio::test]
async fn expired_record_is_rejected_as_expired() {
    let service = token_service();
    let user = active_user();

    let pair = service.issue_session(&user).await.unwrap();
    let claims = service.validate_access(&pair.access_token).unwrap();

    // Force the record past its expiry
    let mut record = service
        .sessions()
        .get(user.id, &claims.jti)
        .await
        .unwrap()
        .unwrap();
    record.expires_at = Utc::now();
    service.sessions().insert(&record).await.unwrap();

    let err = service.rotate_refresh(&pair.refresh_token).await.unwrap_err();
    assert!(matches!(err, TokenError::Expired));
    assert!(!service.sessions().is_live(user.id, &claims.jti).await.unwrap());
}
