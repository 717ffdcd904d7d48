// Token service: access-token minting, refresh-token rotation, revocation.
//
// Access tokens are HS512-signed JWTs validated with zero leeway. Refresh
// tokens are opaque 32-byte random values; the server keeps only their
// SHA-256 hash inside the session record. A logical session keeps one jti
// for its whole lifetime, so rotation overwrites the forward slot in place
// and the access token's jti claim stays pointed at the live record.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use crate::app_config::JwtSettings;
use crate::cache::CacheError;
use crate::db::DieselPool;
use crate::models::session::{AccessTokenClaims, RefreshTokenRecord};
use crate::models::user::{User, UserError};
use crate::services::session_store::SessionStore;
use crate::utils::hash_token;
use crate::utils::service_error::ServiceError;

/// Refresh tokens carry at least 256 bits of entropy
const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token not found")]
    NotFound,

    #[error("Token revoked")]
    Revoked,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    Invalid,

    #[error("User not found")]
    UserNotFound,

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Token encoding error: {0}")]
    Encoding(String),
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::NotFound => ServiceError::TokenNotFound,
            TokenError::Revoked => ServiceError::TokenRevoked,
            TokenError::Expired => ServiceError::TokenExpired,
            TokenError::Invalid => ServiceError::TokenInvalid,
            TokenError::UserNotFound => ServiceError::NotFound("user"),
            TokenError::Cache(e) => e.into(),
            TokenError::Database(msg) => ServiceError::DbUnavailable(msg),
            TokenError::Encoding(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidToken | ErrorKind::InvalidSignature => TokenError::Invalid,
            _ => TokenError::Encoding(err.to_string()),
        }
    }
}

/// Freshly issued credential pair plus the expiries the HTTP layer turns
/// into cookie lifetimes
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Runtime signing configuration
pub struct TokenServiceConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
}

impl TokenServiceConfig {
    pub fn from_settings(settings: &JwtSettings) -> Self {
        Self {
            secret: settings.secret.clone(),
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            access_ttl_seconds: settings.access_expiry_minutes * 60,
            refresh_ttl_seconds: settings.refresh_expiry_days * 86_400,
        }
    }
}

pub struct TokenService {
    issuer: String,
    audience: String,
    access_ttl_seconds: u64,
    refresh_ttl_seconds: u64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    sessions: SessionStore,
    db_pool: Option<DieselPool>,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .field("refresh_ttl_seconds", &self.refresh_ttl_seconds)
            .field("encoding_key", &"<redacted>")
            .field("decoding_key", &"<redacted>")
            .finish()
    }
}

impl TokenService {
    pub fn new(
        config: TokenServiceConfig,
        sessions: SessionStore,
        db_pool: Option<DieselPool>,
    ) -> Self {
        Self {
            issuer: config.issuer,
            audience: config.audience,
            access_ttl_seconds: config.access_ttl_seconds,
            refresh_ttl_seconds: config.refresh_ttl_seconds,
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            sessions,
            db_pool,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    // ------------------------------------------------------------------
    // Minting
    // ------------------------------------------------------------------

    /// Sign an access token for the user under the given session jti
    pub fn mint_access(&self, user: &User, jti: &str) -> Result<(String, DateTime<Utc>), TokenError> {
        let now = Utc::now();
        let expires_at = now + ChronoDuration::seconds(self.access_ttl_seconds as i64);

        let claims = AccessTokenClaims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role.clone(),
            jti: jti.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as u64,
            exp: expires_at.timestamp() as u64,
        };

        let token = encode(&Header::new(Algorithm::HS512), &claims, &self.encoding_key)?;
        Ok((token, expires_at))
    }

    /// Opaque refresh token: 32 CSPRNG bytes, base64url without padding
    fn generate_refresh_value() -> String {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Start a brand-new session for the user: fresh jti, refresh record in
    /// the session store, access token bound to the jti
    pub async fn issue_session(&self, user: &User) -> Result<TokenPair, TokenError> {
        let jti = Uuid::new_v4().to_string();
        let refresh_token = Self::generate_refresh_value();
        let refresh_expires_at =
            Utc::now() + ChronoDuration::seconds(self.refresh_ttl_seconds as i64);

        let record = RefreshTokenRecord::new(
            user.id,
            jti.clone(),
            hash_token(&refresh_token),
            refresh_expires_at,
        );
        self.sessions.insert(&record).await?;

        let (access_token, access_expires_at) = self.mint_access(user, &jti)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        })
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Validate an access token: HS512 signature, audience, issuer, and
    /// expiry with zero clock-skew allowance
    pub fn validate_access(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = 0;

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)?;

        // A token presented exactly at its expiry instant is already dead;
        // the library's check is strictly-less-than
        if token_data.claims.exp <= Utc::now().timestamp() as u64 {
            return Err(TokenError::Expired);
        }

        Ok(token_data.claims)
    }

    /// Resolve a presented refresh token to its live session record.
    /// Classification: unknown hash -> NotFound; revoked record or a hash
    /// that no longer matches the forward slot (already rotated) -> Revoked;
    /// past expiry -> Expired.
    async fn resolve_refresh(
        &self,
        token: &str,
    ) -> Result<(String, RefreshTokenRecord), TokenError> {
        let presented_hash = hash_token(token);

        let forward_key = self
            .sessions
            .find_key_by_token_hash(&presented_hash)
            .await?
            .ok_or(TokenError::NotFound)?;

        let record = match self.sessions.get_by_key(&forward_key).await? {
            Some(record) => record,
            None => return Err(TokenError::NotFound),
        };

        if record.revoked {
            return Err(TokenError::Revoked);
        }

        let matches: bool = record
            .token_hash
            .as_bytes()
            .ct_eq(presented_hash.as_bytes())
            .into();
        if !matches {
            // The reverse entry survived a crash mid-rotation; the forward
            // slot has already moved on
            return Err(TokenError::Revoked);
        }

        if record.is_expired_at(Utc::now()) {
            return Err(TokenError::Expired);
        }

        Ok((forward_key, record))
    }

    /// Check a refresh token without mutating anything
    pub async fn validate_refresh(&self, token: &str) -> Result<bool, TokenError> {
        match self.resolve_refresh(token).await {
            Ok(_) => Ok(true),
            Err(TokenError::NotFound | TokenError::Revoked | TokenError::Expired) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Rotation
    // ------------------------------------------------------------------

    /// Rotate a resolved session to a fresh opaque token.
    ///
    /// The new forward+reverse pair is written before the old reverse entry
    /// is released; a crash in between leaves at most one valid refresh
    /// token, never two.
    async fn rotate_record(
        &self,
        record: &RefreshTokenRecord,
    ) -> Result<(RefreshTokenRecord, String), TokenError> {
        let new_refresh = Self::generate_refresh_value();
        let refresh_expires_at =
            Utc::now() + ChronoDuration::seconds(self.refresh_ttl_seconds as i64);

        // Same jti: one logical session keeps one forward slot for life
        let new_record = RefreshTokenRecord::new(
            record.user_id,
            record.jti.clone(),
            hash_token(&new_refresh),
            refresh_expires_at,
        );

        let won = self.sessions.rotate(&record.token_hash, &new_record).await?;
        if !won {
            // A concurrent refresh of the same token got there first
            return Err(TokenError::Revoked);
        }

        Ok((new_record, new_refresh))
    }

    /// KV-only rotation: validate the presented token and swap it for a new
    /// opaque value without touching the database. Returns the new record
    /// and the new token value.
    pub async fn rotate_refresh(
        &self,
        token: &str,
    ) -> Result<(RefreshTokenRecord, String), TokenError> {
        let (_, record) = self.resolve_refresh(token).await?;
        self.rotate_record(&record).await
    }

    /// Full refresh: rotate the refresh token and mint a matching access
    /// token for the session's user.
    pub async fn refresh(&self, token: &str) -> Result<TokenPair, TokenError> {
        let (_, record) = self.resolve_refresh(token).await?;

        let user = self.load_user(record.user_id).await?;

        let (new_record, new_refresh) = self.rotate_record(&record).await?;

        let (access_token, access_expires_at) = self.mint_access(&user, &record.jti)?;

        Ok(TokenPair {
            access_token,
            refresh_token: new_refresh,
            access_expires_at,
            refresh_expires_at: new_record.expires_at,
        })
    }

    // ------------------------------------------------------------------
    // Revocation (all idempotent)
    // ------------------------------------------------------------------

    pub async fn revoke_session(&self, user_id: Uuid, jti: &str) -> Result<(), TokenError> {
        self.sessions.revoke(user_id, jti).await?;
        Ok(())
    }

    pub async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<usize, TokenError> {
        Ok(self.sessions.revoke_all_for_user(user_id).await?)
    }

    /// Revoke whatever session the presented refresh token belongs to;
    /// silently a no-op for unknown tokens
    pub async fn revoke_by_refresh_token(&self, token: &str) -> Result<(), TokenError> {
        let hash = hash_token(token);

        let Some(forward_key) = self.sessions.find_key_by_token_hash(&hash).await? else {
            return Ok(());
        };

        if let Some((user_id, jti)) = SessionStore::parse_forward_key(&forward_key) {
            self.sessions.revoke(user_id, &jti).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------

    async fn load_user(&self, user_id: Uuid) -> Result<User, TokenError> {
        let pool = self
            .db_pool
            .as_ref()
            .ok_or_else(|| TokenError::Database("database pool not configured".to_string()))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| TokenError::Database(e.to_string()))?;

        User::find_by_id(&mut conn, user_id)
            .await
            .map_err(|e| match e {
                UserError::NotFound => TokenError::UserNotFound,
                other => TokenError::Database(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryKvStore;
    use crate::models::user::{UserRole, UserStatus};
    use std::sync::Arc;

    fn test_service() -> TokenService {
        let sessions = SessionStore::new(Arc::new(MemoryKvStore::new()));
        TokenService::new(
            TokenServiceConfig {
                secret: "x".repeat(64),
                issuer: "keygate-test".to_string(),
                audience: "keygate-test-clients".to_string(),
                access_ttl_seconds: 900,
                refresh_ttl_seconds: 7 * 86_400,
            },
            sessions,
            None,
        )
    }

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "testuser".to_string(),
            email: "test@example.com".to_string(),
            password_hash: "hash".to_string(),
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

    #[test]
    fn test_refresh_value_shape() {
        let a = TokenService::generate_refresh_value();
        let b = TokenService::generate_refresh_value();
        // 32 bytes -> 43 base64url chars, no padding
        assert_eq!(a.len(), 43);
        assert!(!a.contains('='));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_access_token_round_trip() {
        let service = test_service();
        let user = test_user();

        let (token, _expires) = service.mint_access(&user, "some-jti").unwrap();
        let claims = service.validate_access(&token).unwrap();

        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, "User");
        assert_eq!(claims.jti, "some-jti");
    }

    #[tokio::test]
    async fn test_access_token_wrong_audience_rejected() {
        let service = test_service();
        let other = TokenService::new(
            TokenServiceConfig {
                secret: "x".repeat(64),
                issuer: "keygate-test".to_string(),
                audience: "someone-else".to_string(),
                access_ttl_seconds: 900,
                refresh_ttl_seconds: 7 * 86_400,
            },
            SessionStore::new(Arc::new(MemoryKvStore::new())),
            None,
        );

        let (token, _) = other.mint_access(&test_user(), "jti").unwrap();
        assert!(service.validate_access(&token).is_err());
    }

    #[tokio::test]
    async fn test_issue_session_and_validate_refresh() {
        let service = test_service();
        let user = test_user();

        let pair = service.issue_session(&user).await.unwrap();
        assert!(service.validate_refresh(&pair.refresh_token).await.unwrap());
        assert!(!service.validate_refresh("not-a-token").await.unwrap());

        let claims = service.validate_access(&pair.access_token).unwrap();
        assert!(service
            .sessions()
            .is_live(user.id, &claims.jti)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_revoke_session_invalidates_refresh() {
        let service = test_service();
        let user = test_user();

        let pair = service.issue_session(&user).await.unwrap();
        let claims = service.validate_access(&pair.access_token).unwrap();

        service.revoke_session(user.id, &claims.jti).await.unwrap();
        // Idempotent second call
        service.revoke_session(user.id, &claims.jti).await.unwrap();

        assert!(!service.validate_refresh(&pair.refresh_token).await.unwrap());
        assert!(!service.sessions().is_live(user.id, &claims.jti).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_by_refresh_token_noop_on_unknown() {
        let service = test_service();
        service.revoke_by_refresh_token("unknown-token").await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation_invalidates_old_token() {
        let service = test_service();
        let user = test_user();

        let pair = service.issue_session(&user).await.unwrap();
        let (new_record, new_refresh) = service.rotate_refresh(&pair.refresh_token).await.unwrap();

        // The session keeps its jti across the rotation
        let claims = service.validate_access(&pair.access_token).unwrap();
        assert_eq!(new_record.jti, claims.jti);

        // Old token can no longer resolve; the new one can
        let err = service.rotate_refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, TokenError::NotFound | TokenError::Revoked));
        assert!(service.validate_refresh(&new_refresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_succeeds_at_most_once_per_value() {
        let service = test_service();
        let user = test_user();

        let pair = service.issue_session(&user).await.unwrap();

        assert!(service.rotate_refresh(&pair.refresh_token).await.is_ok());
        for _ in 0..3 {
            let err = service.rotate_refresh(&pair.refresh_token).await.unwrap_err();
            assert!(matches!(err, TokenError::NotFound | TokenError::Revoked));
        }
    }
}
