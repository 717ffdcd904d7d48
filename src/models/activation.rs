// License activation rows: one live row per (license, machine fingerprint).
// A partial unique index on the live pair backs up the service-level cap
// check against races the row lock cannot see (e.g. retries after failover).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::license_activations;

/// Activation database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = license_activations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LicenseActivation {
    pub id: Uuid,
    pub license_id: Uuid,
    pub machine_fingerprint: String,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
    pub activated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
}

/// New activation for insertion
#[derive(Debug, Insertable)]
#[diesel(table_name = license_activations)]
pub struct NewLicenseActivation {
    pub license_id: Uuid,
    pub machine_fingerprint: String,
    pub hostname: Option<String>,
    pub ip_address: Option<String>,
}

/// Errors for activation operations
#[derive(thiserror::Error, Debug)]
pub enum ActivationError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Activation not found")]
    NotFound,
}

impl LicenseActivation {
    pub fn is_live(&self) -> bool {
        self.deactivated_at.is_none()
    }

    pub async fn insert(
        conn: &mut AsyncPgConnection,
        new_activation: NewLicenseActivation,
    ) -> Result<Self, ActivationError> {
        use crate::schema::license_activations::dsl::*;

        diesel::insert_into(license_activations)
            .values(&new_activation)
            .get_result::<LicenseActivation>(conn)
            .await
            .map_err(ActivationError::Database)
    }

    /// All live activations of a license
    pub async fn live_for_license(
        conn: &mut AsyncPgConnection,
        license: Uuid,
    ) -> Result<Vec<Self>, ActivationError> {
        use crate::schema::license_activations::dsl::*;

        license_activations
            .filter(license_id.eq(license))
            .filter(deactivated_at.is_null())
            .order(activated_at.asc())
            .load::<LicenseActivation>(conn)
            .await
            .map_err(ActivationError::Database)
    }

    pub async fn count_live(
        conn: &mut AsyncPgConnection,
        license: Uuid,
    ) -> Result<i64, ActivationError> {
        use crate::schema::license_activations::dsl::*;

        license_activations
            .filter(license_id.eq(license))
            .filter(deactivated_at.is_null())
            .count()
            .get_result(conn)
            .await
            .map_err(ActivationError::Database)
    }

    /// The live activation for a (license, fingerprint) pair, if any
    pub async fn find_live(
        conn: &mut AsyncPgConnection,
        license: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Self>, ActivationError> {
        use crate::schema::license_activations::dsl::*;

        license_activations
            .filter(license_id.eq(license))
            .filter(machine_fingerprint.eq(fingerprint))
            .filter(deactivated_at.is_null())
            .first::<LicenseActivation>(conn)
            .await
            .optional()
            .map_err(ActivationError::Database)
    }

    /// Heartbeat update. The incoming hostname only wins when present; the
    /// IP address is always overwritten.
    pub async fn touch(
        conn: &mut AsyncPgConnection,
        activation_id: Uuid,
        new_hostname: Option<String>,
        new_ip: Option<String>,
    ) -> Result<Self, ActivationError> {
        use crate::schema::license_activations::dsl::*;

        let now = Utc::now();

        let result = match new_hostname {
            Some(h) => {
                diesel::update(license_activations.filter(id.eq(activation_id)))
                    .set((last_seen_at.eq(now), hostname.eq(Some(h)), ip_address.eq(new_ip)))
                    .get_result::<LicenseActivation>(conn)
                    .await
            },
            None => {
                diesel::update(license_activations.filter(id.eq(activation_id)))
                    .set((last_seen_at.eq(now), ip_address.eq(new_ip)))
                    .get_result::<LicenseActivation>(conn)
                    .await
            },
        };

        result.map_err(|e| match e {
            diesel::result::Error::NotFound => ActivationError::NotFound,
            _ => ActivationError::Database(e),
        })
    }

    /// Bump last_seen_at only (validation path)
    pub async fn touch_last_seen(
        conn: &mut AsyncPgConnection,
        activation_id: Uuid,
    ) -> Result<(), ActivationError> {
        use crate::schema::license_activations::dsl::*;

        diesel::update(license_activations.filter(id.eq(activation_id)))
            .set(last_seen_at.eq(Utc::now()))
            .execute(conn)
            .await
            .map_err(ActivationError::Database)?;
        Ok(())
    }

    /// Mark the live activation for (license, fingerprint) as deactivated.
    /// Returns whether a row was affected; calling on nothing is a no-op.
    pub async fn deactivate(
        conn: &mut AsyncPgConnection,
        license: Uuid,
        fingerprint: &str,
    ) -> Result<bool, ActivationError> {
        use crate::schema::license_activations::dsl::*;

        let updated = diesel::update(
            license_activations
                .filter(license_id.eq(license))
                .filter(machine_fingerprint.eq(fingerprint))
                .filter(deactivated_at.is_null()),
        )
        .set(deactivated_at.eq(Some(Utc::now())))
        .execute(conn)
        .await
        .map_err(ActivationError::Database)?;

        Ok(updated > 0)
    }

    pub async fn count_all_live(conn: &mut AsyncPgConnection) -> Result<i64, ActivationError> {
        use crate::schema::license_activations::dsl::*;

        license_activations
            .filter(deactivated_at.is_null())
            .count()
            .get_result(conn)
            .await
            .map_err(ActivationError::Database)
    }
}
