// License database model.
// The activation cap is enforced by the service layer inside a transaction
// that locks the license row (`find_by_key_for_update`), so the queries here
// stay simple.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::schema::licenses;

/// License lifecycle status. Revoked is terminal except for delete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LicenseStatus {
    Active,
    Expired,
    Revoked,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "Active",
            LicenseStatus::Expired => "Expired",
            LicenseStatus::Revoked => "Revoked",
        }
    }
}

impl FromStr for LicenseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(LicenseStatus::Active),
            "Expired" => Ok(LicenseStatus::Expired),
            "Revoked" => Ok(LicenseStatus::Revoked),
            _ => Err(format!("Invalid license status: {}", s)),
        }
    }
}

/// License database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = licenses)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct License {
    pub id: Uuid,
    pub license_key: String,
    pub user_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub max_activations: i32,
}

/// New license for insertion
#[derive(Debug, Insertable)]
#[diesel(table_name = licenses)]
pub struct NewLicense {
    pub license_key: String,
    pub user_id: Uuid,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub max_activations: i32,
}

/// Errors for license operations
#[derive(thiserror::Error, Debug)]
pub enum LicenseModelError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("License not found")]
    NotFound,
}

impl License {
    pub fn status_enum(&self) -> LicenseStatus {
        LicenseStatus::from_str(&self.status).unwrap_or_else(|e| {
            tracing::warn!("Invalid status '{}' for license {}: {}", self.status, self.id, e);
            LicenseStatus::Revoked
        })
    }

    /// A license expiring exactly at `now` counts as expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_license: NewLicense,
    ) -> Result<Self, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        diesel::insert_into(licenses)
            .values(&new_license)
            .get_result::<License>(conn)
            .await
            .map_err(LicenseModelError::Database)
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        license_id: Uuid,
    ) -> Result<Self, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        licenses
            .filter(id.eq(license_id))
            .first::<License>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => LicenseModelError::NotFound,
                _ => LicenseModelError::Database(e),
            })
    }

    pub async fn find_by_key(
        conn: &mut AsyncPgConnection,
        key: &str,
    ) -> Result<Self, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        licenses
            .filter(license_key.eq(key))
            .first::<License>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => LicenseModelError::NotFound,
                _ => LicenseModelError::Database(e),
            })
    }

    /// Lock the license row for the duration of the surrounding transaction.
    /// Serializes concurrent activations against the cap check.
    pub async fn find_by_key_for_update(
        conn: &mut AsyncPgConnection,
        key: &str,
    ) -> Result<Self, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        licenses
            .filter(license_key.eq(key))
            .for_update()
            .first::<License>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => LicenseModelError::NotFound,
                _ => LicenseModelError::Database(e),
            })
    }

    pub async fn list(
        conn: &mut AsyncPgConnection,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        licenses
            .order(created_at.desc())
            .limit(limit)
            .offset(offset)
            .load::<License>(conn)
            .await
            .map_err(LicenseModelError::Database)
    }

    pub async fn list_for_user(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
    ) -> Result<Vec<Self>, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        licenses
            .filter(user_id.eq(owner))
            .order(created_at.desc())
            .load::<License>(conn)
            .await
            .map_err(LicenseModelError::Database)
    }

    /// Count the user's licenses currently in Active status
    pub async fn count_active_for_user(
        conn: &mut AsyncPgConnection,
        owner: Uuid,
    ) -> Result<i64, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        licenses
            .filter(user_id.eq(owner))
            .filter(status.eq(LicenseStatus::Active.as_str()))
            .count()
            .get_result(conn)
            .await
            .map_err(LicenseModelError::Database)
    }

    pub async fn set_status(
        conn: &mut AsyncPgConnection,
        license_id: Uuid,
        new_status: LicenseStatus,
        revoked: Option<DateTime<Utc>>,
    ) -> Result<Self, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        diesel::update(licenses.filter(id.eq(license_id)))
            .set((status.eq(new_status.as_str()), revoked_at.eq(revoked)))
            .get_result::<License>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => LicenseModelError::NotFound,
                _ => LicenseModelError::Database(e),
            })
    }

    pub async fn set_expiry(
        conn: &mut AsyncPgConnection,
        license_id: Uuid,
        new_expires_at: DateTime<Utc>,
    ) -> Result<Self, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        diesel::update(licenses.filter(id.eq(license_id)))
            .set((
                status.eq(LicenseStatus::Active.as_str()),
                expires_at.eq(new_expires_at),
            ))
            .get_result::<License>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => LicenseModelError::NotFound,
                _ => LicenseModelError::Database(e),
            })
    }

    pub async fn delete(
        conn: &mut AsyncPgConnection,
        license_id: Uuid,
    ) -> Result<(), LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        let deleted = diesel::delete(licenses.filter(id.eq(license_id)))
            .execute(conn)
            .await
            .map_err(LicenseModelError::Database)?;

        if deleted == 0 {
            return Err(LicenseModelError::NotFound);
        }
        Ok(())
    }

    /// Batch transition Active -> Expired for everything past its expiry.
    /// Monotonic, so concurrent sweepers are safe (last writer wins).
    pub async fn expire_due(
        conn: &mut AsyncPgConnection,
        now: DateTime<Utc>,
    ) -> Result<usize, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        diesel::update(
            licenses
                .filter(status.eq(LicenseStatus::Active.as_str()))
                .filter(expires_at.le(now)),
        )
        .set(status.eq(LicenseStatus::Expired.as_str()))
        .execute(conn)
        .await
        .map_err(LicenseModelError::Database)
    }

    pub async fn count_by_status(
        conn: &mut AsyncPgConnection,
        wanted: LicenseStatus,
    ) -> Result<i64, LicenseModelError> {
        use crate::schema::licenses::dsl::*;

        licenses
            .filter(status.eq(wanted.as_str()))
            .count()
            .get_result(conn)
            .await
            .map_err(LicenseModelError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn license(status: LicenseStatus, expires_in: Duration) -> License {
        let now = Utc::now();
        License {
            id: Uuid::new_v4(),
            license_key: "ABCDE-12345-FGHIJ-67890-KLMNO".to_string(),
            user_id: Uuid::new_v4(),
            status: status.as_str().to_string(),
            created_at: now,
            expires_at: now + expires_in,
            revoked_at: None,
            max_activations: 1,
        }
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(LicenseStatus::from_str("Active"), Ok(LicenseStatus::Active));
        assert_eq!(LicenseStatus::from_str("Expired"), Ok(LicenseStatus::Expired));
        assert!(LicenseStatus::from_str("void").is_err());
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let lic = license(LicenseStatus::Active, Duration::zero());
        // expires_at == now counts as expired
        assert!(lic.is_expired_at(lic.expires_at));
        assert!(!lic.is_expired_at(lic.expires_at - Duration::seconds(1)));
    }
}
