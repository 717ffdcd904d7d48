// Session types held in the KV store (never in PostgreSQL) and the access
// token claims that bind a JWT to its session record via `jti`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by every access token.
/// `jti` links the token to its `session:{sub}:{jti}` record; the session
/// filter rejects tokens whose record is gone or revoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

/// Refresh session record, the server's source of truth for "this session is
/// alive". Stored at `session:{user_id}:{jti}` with a TTL matching
/// `expires_at`; the opaque token itself is only kept as a one-way hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshTokenRecord {
    pub user_id: Uuid,
    pub jti: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token_id: Option<String>,
}

impl RefreshTokenRecord {
    pub fn new(
        user_id: Uuid,
        jti: String,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            jti,
            token_hash,
            created_at: Utc::now(),
            expires_at,
            revoked: false,
            revoked_at: None,
            replaced_by_token_id: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fresh_record_is_live() {
        let record = RefreshTokenRecord::new(
            Uuid::new_v4(),
            Uuid::new_v4().to_string(),
            "hash".to_string(),
            Utc::now() + Duration::days(7),
        );
        assert!(!record.revoked);
        assert!(!record.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_expiry_boundary() {
        let record = RefreshTokenRecord::new(
            Uuid::new_v4(),
            "jti".to_string(),
            "hash".to_string(),
            Utc::now(),
        );
        assert!(record.is_expired_at(record.expires_at));
    }
}
