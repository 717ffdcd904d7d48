// User database model and account state machine.
// Status transitions are guarded here so no caller can move an account into
// an inconsistent state; handlers persist the mutated row afterwards.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::schema::users;

/// Account role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "Admin",
            UserRole::User => "User",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(UserRole::Admin),
            "User" => Ok(UserRole::User),
            _ => Err(format!("Invalid user role: {}", s)),
        }
    }
}

/// Account status. Unverified is the initial state; Blocked is reachable
/// from every other state and only leaves via unblock or verify.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserStatus {
    Unverified,
    Verified,
    Active,
    Blocked,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Unverified => "Unverified",
            UserStatus::Verified => "Verified",
            UserStatus::Active => "Active",
            UserStatus::Blocked => "Blocked",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unverified" => Ok(UserStatus::Unverified),
            "Verified" => Ok(UserStatus::Verified),
            "Active" => Ok(UserStatus::Active),
            "Blocked" => Ok(UserStatus::Blocked),
            _ => Err(format!("Invalid user status: {}", s)),
        }
    }
}

/// Invalid state transitions fail fast with this error
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum UserStateError {
    #[error("Cannot activate a blocked account")]
    ActivateBlocked,
}

/// User database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub notify_expiry: bool,
    pub notify_activity: bool,
    pub notify_announcements: bool,
}

/// New user for insertion
#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
}

/// User update struct
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = users)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub status: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub verified_at: Option<Option<DateTime<Utc>>>,
    pub last_login: Option<DateTime<Utc>>,
    pub blocked_at: Option<Option<DateTime<Utc>>>,
    pub notify_expiry: Option<bool>,
    pub notify_activity: Option<bool>,
    pub notify_announcements: Option<bool>,
}

/// Errors for user operations
#[derive(thiserror::Error, Debug)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("User not found")]
    NotFound,

    #[error("Invalid state transition: {0}")]
    State(#[from] UserStateError),
}

impl User {
    pub fn status_enum(&self) -> UserStatus {
        UserStatus::from_str(&self.status).unwrap_or_else(|e| {
            tracing::warn!("Invalid status '{}' for user {}: {}", self.status, self.id, e);
            UserStatus::Blocked
        })
    }

    pub fn role_enum(&self) -> UserRole {
        UserRole::from_str(&self.role).unwrap_or_else(|e| {
            tracing::warn!("Invalid role '{}' for user {}: {}", self.role, self.id, e);
            UserRole::User
        })
    }

    pub fn is_blocked(&self) -> bool {
        self.status_enum() == UserStatus::Blocked
    }

    // ------------------------------------------------------------------
    // State machine. Each guard mutates the in-memory row; callers persist
    // with `save_status`. Returns whether anything changed.
    // ------------------------------------------------------------------

    /// Unverified/Blocked -> Verified. No-op when already Verified/Active.
    pub fn verify(&mut self) -> Result<bool, UserStateError> {
        match self.status_enum() {
            UserStatus::Unverified | UserStatus::Blocked => {
                let now = Utc::now();
                self.status = UserStatus::Verified.as_str().to_string();
                self.verified_at = Some(now);
                self.blocked_at = None;
                self.updated_at = Some(now);
                Ok(true)
            },
            UserStatus::Verified | UserStatus::Active => Ok(false),
        }
    }

    /// Unverified/Verified -> Active. Fails from Blocked.
    pub fn activate(&mut self) -> Result<bool, UserStateError> {
        match self.status_enum() {
            UserStatus::Unverified | UserStatus::Verified => {
                self.status = UserStatus::Active.as_str().to_string();
                self.updated_at = Some(Utc::now());
                Ok(true)
            },
            UserStatus::Active => Ok(false),
            UserStatus::Blocked => Err(UserStateError::ActivateBlocked),
        }
    }

    /// Any non-Blocked -> Blocked. No-op when already Blocked.
    pub fn block(&mut self) -> Result<bool, UserStateError> {
        match self.status_enum() {
            UserStatus::Blocked => Ok(false),
            _ => {
                let now = Utc::now();
                self.status = UserStatus::Blocked.as_str().to_string();
                self.blocked_at = Some(now);
                self.updated_at = Some(now);
                Ok(true)
            },
        }
    }

    /// Blocked -> Active. No-op otherwise.
    pub fn unblock(&mut self) -> Result<bool, UserStateError> {
        match self.status_enum() {
            UserStatus::Blocked => {
                self.status = UserStatus::Active.as_str().to_string();
                self.blocked_at = None;
                self.updated_at = Some(Utc::now());
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn find_by_id(conn: &mut AsyncPgConnection, user_id: Uuid) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;

        users
            .filter(id.eq(user_id))
            .first::<User>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => UserError::NotFound,
                _ => UserError::Database(e),
            })
    }

    /// Find user by username (case-insensitive)
    pub async fn find_by_username(
        conn: &mut AsyncPgConnection,
        name: &str,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;
        use diesel::PgTextExpressionMethods;

        users
            .filter(username.ilike(name))
            .first::<User>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => UserError::NotFound,
                _ => UserError::Database(e),
            })
    }

    /// Find user by email (case-insensitive)
    pub async fn find_by_email(
        conn: &mut AsyncPgConnection,
        email_str: &str,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;
        use diesel::PgTextExpressionMethods;

        users
            .filter(email.ilike(email_str))
            .first::<User>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => UserError::NotFound,
                _ => UserError::Database(e),
            })
    }

    /// Check whether a username or email is already taken (case-insensitive)
    pub async fn username_or_email_exists(
        conn: &mut AsyncPgConnection,
        name: &str,
        email_str: &str,
    ) -> Result<(bool, bool), UserError> {
        let name_taken = match Self::find_by_username(conn, name).await {
            Ok(_) => true,
            Err(UserError::NotFound) => false,
            Err(e) => return Err(e),
        };
        let email_taken = match Self::find_by_email(conn, email_str).await {
            Ok(_) => true,
            Err(UserError::NotFound) => false,
            Err(e) => return Err(e),
        };
        Ok((name_taken, email_taken))
    }

    pub async fn create(conn: &mut AsyncPgConnection, new_user: NewUser) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;

        diesel::insert_into(users)
            .values(&new_user)
            .get_result::<User>(conn)
            .await
            .map_err(UserError::Database)
    }

    pub async fn update(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        update: UserUpdate,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set(&update)
            .get_result::<User>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => UserError::NotFound,
                _ => UserError::Database(e),
            })
    }

    /// Persist the status fields touched by the state machine guards
    pub async fn save_status(&self, conn: &mut AsyncPgConnection) -> Result<(), UserError> {
        let update = UserUpdate {
            status: Some(self.status.clone()),
            verified_at: Some(self.verified_at),
            blocked_at: Some(self.blocked_at),
            updated_at: self.updated_at,
            ..Default::default()
        };
        Self::update(conn, self.id, update).await?;
        Ok(())
    }

    /// Cascade delete: licenses and activations go via FK constraints
    pub async fn delete(conn: &mut AsyncPgConnection, user_id: Uuid) -> Result<(), UserError> {
        use crate::schema::users::dsl::*;

        let deleted = diesel::delete(users.filter(id.eq(user_id)))
            .execute(conn)
            .await
            .map_err(UserError::Database)?;

        if deleted == 0 {
            return Err(UserError::NotFound);
        }
        Ok(())
    }

    pub async fn touch_last_login(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<(), UserError> {
        use crate::schema::users::dsl::*;

        diesel::update(users.filter(id.eq(user_id)))
            .set(last_login.eq(Some(Utc::now())))
            .execute(conn)
            .await
            .map_err(UserError::Database)?;
        Ok(())
    }

    pub async fn list(
        conn: &mut AsyncPgConnection,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, UserError> {
        use crate::schema::users::dsl::*;

        users
            .order(created_at.desc())
            .limit(limit)
            .offset(offset)
            .load::<User>(conn)
            .await
            .map_err(UserError::Database)
    }

    pub async fn count(conn: &mut AsyncPgConnection) -> Result<i64, UserError> {
        use crate::schema::users::dsl::*;

        users
            .count()
            .get_result(conn)
            .await
            .map_err(UserError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_in(status: UserStatus) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            username: "testuser".to_string(),
            email: "test@example.com".to_string(),
            password_hash: "hash".to_string(),
            role: UserRole::User.as_str().to_string(),
            status: status.as_str().to_string(),
            created_at: now,
            updated_at: None,
            verified_at: None,
            last_login: None,
            blocked_at: if status == UserStatus::Blocked {
                Some(now)
            } else {
                None
            },
            notify_expiry: true,
            notify_activity: true,
            notify_announcements: false,
        }
    }

    #[test]
    fn test_verify_from_unverified() {
        let mut user = user_in(UserStatus::Unverified);
        assert_eq!(user.verify(), Ok(true));
        assert_eq!(user.status_enum(), UserStatus::Verified);
        assert!(user.verified_at.is_some());
        assert!(user.updated_at.is_some());
    }

    #[test]
    fn test_verify_from_blocked() {
        let mut user = user_in(UserStatus::Blocked);
        assert_eq!(user.verify(), Ok(true));
        assert_eq!(user.status_enum(), UserStatus::Verified);
        assert!(user.blocked_at.is_none());
    }

    #[test]
    fn test_verify_noop_when_verified_or_active() {
        for status in [UserStatus::Verified, UserStatus::Active] {
            let mut user = user_in(status);
            assert_eq!(user.verify(), Ok(false));
            assert_eq!(user.status_enum(), status);
        }
    }

    #[test]
    fn test_activate_paths() {
        let mut user = user_in(UserStatus::Unverified);
        assert_eq!(user.activate(), Ok(true));
        assert_eq!(user.status_enum(), UserStatus::Active);

        let mut user = user_in(UserStatus::Verified);
        assert_eq!(user.activate(), Ok(true));

        let mut user = user_in(UserStatus::Active);
        assert_eq!(user.activate(), Ok(false));
    }

    #[test]
    fn test_activate_fails_from_blocked() {
        let mut user = user_in(UserStatus::Blocked);
        assert_eq!(user.activate(), Err(UserStateError::ActivateBlocked));
        assert_eq!(user.status_enum(), UserStatus::Blocked);
    }

    #[test]
    fn test_block_from_every_state() {
        for status in [UserStatus::Unverified, UserStatus::Verified, UserStatus::Active] {
            let mut user = user_in(status);
            assert_eq!(user.block(), Ok(true));
            assert_eq!(user.status_enum(), UserStatus::Blocked);
            assert!(user.blocked_at.is_some());
        }

        let mut user = user_in(UserStatus::Blocked);
        assert_eq!(user.block(), Ok(false));
    }

    #[test]
    fn test_unblock() {
        let mut user = user_in(UserStatus::Blocked);
        assert_eq!(user.unblock(), Ok(true));
        assert_eq!(user.status_enum(), UserStatus::Active);
        assert!(user.blocked_at.is_none());

        let mut user = user_in(UserStatus::Active);
        assert_eq!(user.unblock(), Ok(false));
    }

    #[test]
    fn test_role_and_status_round_trip() {
        assert_eq!(UserStatus::from_str("Active"), Ok(UserStatus::Active));
        assert!(UserStatus::from_str("active").is_err());
        assert_eq!(UserRole::from_str("Admin"), Ok(UserRole::Admin));
        assert!(UserRole::from_str("root").is_err());
    }
}
