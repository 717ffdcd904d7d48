// Auth service: login, registration, password change/reset, and email
// verification, orchestrating the user repository, the token service, and
// the KV store.
//
// Login failures are deliberately uniform: wrong username, wrong password
// and missing user all map to InvalidCredentials so the endpoint cannot be
// used to probe for accounts. Verification and reset tokens are single-use,
// 256-bit, and stored only in the KV store under a TTL.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::app_config::{CacheSettings, SecuritySettings};
use crate::cache::{get_json, set_json, SharedKvStore};
use crate::db::DieselPool;
use crate::models::user::{NewUser, User, UserError, UserRole, UserStatus, UserUpdate};
use crate::services::email::EmailService;
use crate::services::token::{TokenPair, TokenService};
use crate::utils::password::{hash_password, verify_password};
use crate::utils::service_error::ServiceError;

const VERIFY_TOKEN_PREFIX: &str = "email_verify";
const RESET_TOKEN_PREFIX: &str = "password_reset";
const USER_CACHE_PREFIX: &str = "user";

/// Cacheable projection of a user row; never carries the password hash
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub notify_expiry: bool,
    pub notify_activity: bool,
    pub notify_announcements: bool,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            status: user.status.clone(),
            created_at: user.created_at,
            verified_at: user.verified_at,
            last_login: user.last_login,
            notify_expiry: user.notify_expiry,
            notify_activity: user.notify_activity,
            notify_announcements: user.notify_announcements,
        }
    }
}

/// Notification preference toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub expiry: bool,
    pub activity: bool,
    pub announcements: bool,
}

pub struct AuthService {
    db_pool: DieselPool,
    kv: SharedKvStore,
    tokens: Arc<TokenService>,
    email: Arc<EmailService>,
    security: SecuritySettings,
    cache: CacheSettings,
}

/// 32 CSPRNG bytes, base64url: verification and reset tokens
fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl AuthService {
    pub fn new(
        db_pool: DieselPool,
        kv: SharedKvStore,
        tokens: Arc<TokenService>,
        email: Arc<EmailService>,
        security: SecuritySettings,
        cache: CacheSettings,
    ) -> Self {
        Self {
            db_pool,
            kv,
            tokens,
            email,
            security,
            cache,
        }
    }

    async fn conn(
        &self,
    ) -> Result<
        bb8::PooledConnection<
            '_,
            diesel_async::pooled_connection::AsyncDieselConnectionManager<
                diesel_async::AsyncPgConnection,
            >,
        >,
        ServiceError,
    > {
        self.db_pool
            .get()
            .await
            .map_err(|e| ServiceError::DbUnavailable(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Login / logout
    // ------------------------------------------------------------------

    /// Authenticate a user and start a fresh session.
    ///
    /// If the browser presented a refresh cookie, that session is revoked
    /// first so one browser never accumulates stacked sessions.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        presented_refresh: Option<&str>,
    ) -> Result<(TokenPair, User), ServiceError> {
        if let Some(existing) = presented_refresh {
            self.tokens.revoke_by_refresh_token(existing).await?;
        }

        let mut conn = self.conn().await?;

        let user = match User::find_by_username(&mut conn, username).await {
            Ok(user) => user,
            Err(UserError::NotFound) => return Err(ServiceError::InvalidCredentials),
            Err(e) => return Err(ServiceError::DbUnavailable(e.to_string())),
        };

        if !verify_password(password, &user.password_hash)? {
            return Err(ServiceError::InvalidCredentials);
        }

        if user.is_blocked() {
            return Err(ServiceError::AccountBlocked);
        }

        let pair = self.tokens.issue_session(&user).await.map_err(ServiceError::from)?;

        User::touch_last_login(&mut conn, user.id)
            .await
            .map_err(|e| ServiceError::DbUnavailable(e.to_string()))?;

        info!(user_id = %user.id, "user logged in");
        Ok((pair, user))
    }

    // ------------------------------------------------------------------
    // Registration & email verification
    // ------------------------------------------------------------------

    /// Register a new account in Unverified state and queue the
    /// verification email
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, ServiceError> {
        let mut conn = self.conn().await?;

        let (name_taken, email_taken) = User::username_or_email_exists(&mut conn, username, email)
            .await
            .map_err(|e| ServiceError::DbUnavailable(e.to_string()))?;
        if name_taken {
            return Err(ServiceError::Conflict("Username is already taken".to_string()));
        }
        if email_taken {
            return Err(ServiceError::Conflict("Email is already registered".to_string()));
        }

        let password_hash = hash_password(password, self.security.bcrypt_cost)?;

        let user = User::create(
            &mut conn,
            NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
                role: UserRole::User.as_str().to_string(),
                status: UserStatus::Unverified.as_str().to_string(),
            },
        )
        .await
        .map_err(|e| ServiceError::DbUnavailable(e.to_string()))?;

        self.issue_verification_token(&user).await?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Store a fresh verification token and queue the email send
    async fn issue_verification_token(&self, user: &User) -> Result<(), ServiceError> {
        let token = generate_opaque_token();
        let ttl = Duration::from_secs(self.security.verification_token_ttl_hours * 3600);

        self.kv
            .set(
                &format!("{}:{}", VERIFY_TOKEN_PREFIX, token),
                user.id.to_string(),
                Some(ttl),
            )
            .await?;

        self.email.queue_verification(&user.email, &user.username, &token);
        Ok(())
    }

    /// Consume a verification token and move the account to Verified
    pub async fn verify_email(&self, token: &str) -> Result<User, ServiceError> {
        let key = format!("{}:{}", VERIFY_TOKEN_PREFIX, token);

        let user_id = self
            .kv
            .get(&key)
            .await?
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .ok_or_else(|| ServiceError::Conflict("Invalid or expired verification token".to_string()))?;

        let mut conn = self.conn().await?;
        let mut user = match User::find_by_id(&mut conn, user_id).await {
            Ok(user) => user,
            Err(UserError::NotFound) => {
                return Err(ServiceError::Conflict(
                    "Invalid or expired verification token".to_string(),
                ))
            },
            Err(e) => return Err(ServiceError::DbUnavailable(e.to_string())),
        };

        match user.status_enum() {
            UserStatus::Verified | UserStatus::Active => {
                return Err(ServiceError::Conflict("Email is already verified".to_string()));
            },
            _ => {},
        }

        user.verify()
            .map_err(|e| ServiceError::Conflict(e.to_string()))?;
        user.save_status(&mut conn)
            .await
            .map_err(|e| ServiceError::DbUnavailable(e.to_string()))?;

        // Single use
        self.kv.remove(&key).await?;
        self.invalidate_profile_cache(user.id).await;

        info!(user_id = %user.id, "email verified");
        Ok(user)
    }

    /// Re-send the verification email. Raises NotFound/Conflict for the
    /// caller to swallow; the HTTP layer always answers with the same shape
    /// to prevent email enumeration.
    pub async fn resend_verification(&self, email: &str) -> Result<(), ServiceError> {
        let mut conn = self.conn().await?;

        let user = match User::find_by_email(&mut conn, email).await {
            Ok(user) => user,
            Err(UserError::NotFound) => return Err(ServiceError::NotFound("user")),
            Err(e) => return Err(ServiceError::DbUnavailable(e.to_string())),
        };

        match user.status_enum() {
            UserStatus::Unverified => {},
            _ => return Err(ServiceError::Conflict("Email is already verified".to_string())),
        }

        self.issue_verification_token(&user).await
    }

    // ------------------------------------------------------------------
    // Password change / reset
    // ------------------------------------------------------------------

    /// Change password and revoke every session: each device must log in
    /// again with the new credential
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        let mut conn = self.conn().await?;

        let user = match User::find_by_id(&mut conn, user_id).await {
            Ok(user) => user,
            Err(UserError::NotFound) => return Err(ServiceError::NotFound("user")),
            Err(e) => return Err(ServiceError::DbUnavailable(e.to_string())),
        };

        if !verify_password(current_password, &user.password_hash)? {
            return Err(ServiceError::InvalidCredentials);
        }

        let password_hash = hash_password(new_password, self.security.bcrypt_cost)?;
        User::update(
            &mut conn,
            user_id,
            UserUpdate {
                password_hash: Some(password_hash),
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| ServiceError::DbUnavailable(e.to_string()))?;

        let revoked = self.tokens.revoke_all_sessions(user_id).await?;
        info!(user_id = %user_id, revoked, "password changed, sessions revoked");
        Ok(())
    }

    /// Issue a reset token for the account, if it exists. NotFound is raised
    /// for the HTTP layer to swallow.
    pub async fn forgot_password(&self, email: &str) -> Result<(), ServiceError> {
        let mut conn = self.conn().await?;

        let user = match User::find_by_email(&mut conn, email).await {
            Ok(user) => user,
            Err(UserError::NotFound) => return Err(ServiceError::NotFound("user")),
            Err(e) => return Err(ServiceError::DbUnavailable(e.to_string())),
        };

        let token = generate_opaque_token();
        let ttl = Duration::from_secs(self.security.password_reset_token_ttl_minutes * 60);

        self.kv
            .set(
                &format!("{}:{}", RESET_TOKEN_PREFIX, token),
                user.id.to_string(),
                Some(ttl),
            )
            .await?;

        self.email.queue_password_reset(&user.email, &user.username, &token);
        Ok(())
    }

    /// Consume a reset token, set the new password, revoke all sessions
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), ServiceError> {
        let key = format!("{}:{}", RESET_TOKEN_PREFIX, token);

        let user_id = self
            .kv
            .get(&key)
            .await?
            .and_then(|raw| Uuid::parse_str(&raw).ok())
            .ok_or_else(|| ServiceError::Conflict("Invalid or expired reset token".to_string()))?;

        let mut conn = self.conn().await?;

        let password_hash = hash_password(new_password, self.security.bcrypt_cost)?;
        match User::update(
            &mut conn,
            user_id,
            UserUpdate {
                password_hash: Some(password_hash),
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        {
            Ok(_) => {},
            Err(UserError::NotFound) => {
                return Err(ServiceError::Conflict("Invalid or expired reset token".to_string()))
            },
            Err(e) => return Err(ServiceError::DbUnavailable(e.to_string())),
        }

        // Single use
        self.kv.remove(&key).await?;

        let revoked = self.tokens.revoke_all_sessions(user_id).await?;
        info!(user_id = %user_id, revoked, "password reset, sessions revoked");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Profile (sliding KV cache in front of the user row)
    // ------------------------------------------------------------------

    fn profile_cache_key(user_id: Uuid) -> String {
        format!("{}:{}", USER_CACHE_PREFIX, user_id)
    }

    async fn invalidate_profile_cache(&self, user_id: Uuid) {
        let _ = self.kv.remove(&Self::profile_cache_key(user_id)).await;
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, ServiceError> {
        let key = Self::profile_cache_key(user_id);
        let ttl = Duration::from_secs(self.cache.user_sliding_expiration_minutes * 60);

        if let Some(profile) = get_json::<UserProfile>(self.kv.as_ref(), &key).await? {
            // Sliding expiration: a hit extends the entry
            self.kv.refresh(&key, ttl).await?;
            return Ok(profile);
        }

        let mut conn = self.conn().await?;
        let user = match User::find_by_id(&mut conn, user_id).await {
            Ok(user) => user,
            Err(UserError::NotFound) => return Err(ServiceError::NotFound("user")),
            Err(e) => return Err(ServiceError::DbUnavailable(e.to_string())),
        };

        let profile = UserProfile::from(&user);
        set_json(self.kv.as_ref(), &key, &profile, Some(ttl)).await?;
        Ok(profile)
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        email: Option<String>,
    ) -> Result<UserProfile, ServiceError> {
        let mut conn = self.conn().await?;

        if let Some(ref new_email) = email {
            match User::find_by_email(&mut conn, new_email).await {
                Ok(existing) if existing.id != user_id => {
                    return Err(ServiceError::Conflict("Email is already registered".to_string()))
                },
                Ok(_) | Err(UserError::NotFound) => {},
                Err(e) => return Err(ServiceError::DbUnavailable(e.to_string())),
            }
        }

        let user = User::update(
            &mut conn,
            user_id,
            UserUpdate {
                email,
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| match e {
            UserError::NotFound => ServiceError::NotFound("user"),
            other => ServiceError::DbUnavailable(other.to_string()),
        })?;

        self.invalidate_profile_cache(user_id).await;
        Ok(UserProfile::from(&user))
    }

    pub async fn get_notifications(
        &self,
        user_id: Uuid,
    ) -> Result<NotificationPreferences, ServiceError> {
        let profile = self.get_profile(user_id).await?;
        Ok(NotificationPreferences {
            expiry: profile.notify_expiry,
            activity: profile.notify_activity,
            announcements: profile.notify_announcements,
        })
    }

    pub async fn update_notifications(
        &self,
        user_id: Uuid,
        prefs: NotificationPreferences,
    ) -> Result<NotificationPreferences, ServiceError> {
        let mut conn = self.conn().await?;

        User::update(
            &mut conn,
            user_id,
            UserUpdate {
                notify_expiry: Some(prefs.expiry),
                notify_activity: Some(prefs.activity),
                notify_announcements: Some(prefs.announcements),
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| match e {
            UserError::NotFound => ServiceError::NotFound("user"),
            other => ServiceError::DbUnavailable(other.to_string()),
        })?;

        self.invalidate_profile_cache(user_id).await;
        Ok(prefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_token_shape() {
        let a = generate_opaque_token();
        let b = generate_opaque_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }

    #[test]
    fn test_profile_never_carries_password_hash() {
        let serialized = serde_json::to_string(&UserProfile {
            id: Uuid::new_v4(),
            username: "u".into(),
            email: "u@example.com".into(),
            role: "User".into(),
            status: "Active".into(),
            created_at: Utc::now(),
            verified_at: None,
            last_login: None,
            notify_expiry: true,
            notify_activity: false,
            notify_announcements: false,
        })
        .unwrap();
        assert!(!serialized.contains("password"));
    }
}
