// License engine: key generation, lifecycle transitions, fingerprint-bound
// activations with a hard cap, validation and heartbeats.
//
// Activation runs inside a transaction that locks the license row, so two
// concurrent activations cannot both pass the cap check. The partial unique
// index on live (license_id, fingerprint) pairs catches the remaining race
// and routes it onto the heartbeat path.

use chrono::{DateTime, Utc};
use diesel::result::DatabaseErrorKind;
use diesel_async::AsyncConnection;
use rand::rngs::OsRng;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::app_config::LicenseSettings;
use crate::db::DieselPool;
use crate::models::activation::{ActivationError, LicenseActivation, NewLicenseActivation};
use crate::models::license::{License, LicenseModelError, LicenseStatus, NewLicense};
use crate::utils::service_error::ServiceError;

/// Key alphabet: 36 symbols, five dash-joined groups of five
const KEY_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const KEY_GROUPS: usize = 5;
const KEY_GROUP_LEN: usize = 5;

#[derive(Error, Debug, PartialEq)]
pub enum LicenseError {
    #[error("License not found")]
    NotFound,

    #[error("License is not active")]
    NotActive,

    #[error("License has expired")]
    Expired,

    #[error("License is already revoked")]
    AlreadyRevoked,

    #[error("A revoked license cannot be renewed")]
    RenewRevoked,

    #[error("Expiry must be in the future")]
    InvalidExpiry,

    #[error("User already has an active license")]
    SingleActivePolicy,

    #[error("Activation limit reached")]
    ActivationLimitReached,

    #[error("Activation not found")]
    ActivationNotFound,

    #[error("Concurrent activation for this fingerprint")]
    ActivationRace,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<diesel::result::Error> for LicenseError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => LicenseError::NotFound,
            other => LicenseError::Database(other.to_string()),
        }
    }
}

impl From<LicenseModelError> for LicenseError {
    fn from(err: LicenseModelError) -> Self {
        match err {
            LicenseModelError::NotFound => LicenseError::NotFound,
            LicenseModelError::Database(e) => LicenseError::Database(e.to_string()),
        }
    }
}

impl From<ActivationError> for LicenseError {
    fn from(err: ActivationError) -> Self {
        match err {
            ActivationError::NotFound => LicenseError::ActivationNotFound,
            ActivationError::Database(e) => LicenseError::Database(e.to_string()),
        }
    }
}

impl From<LicenseError> for ServiceError {
    fn from(err: LicenseError) -> Self {
        match err {
            LicenseError::NotFound => ServiceError::NotFound("license"),
            LicenseError::ActivationNotFound => ServiceError::NotFound("activation"),
            LicenseError::ActivationLimitReached => ServiceError::ActivationLimitReached,
            LicenseError::Database(msg) => ServiceError::DbUnavailable(msg),
            other => ServiceError::Conflict(other.to_string()),
        }
    }
}

/// Generate a license key from the system CSPRNG. The keyspace (36^25) makes
/// collisions negligible; no uniqueness probe is needed.
pub fn generate_license_key() -> String {
    let mut rng = OsRng;
    (0..KEY_GROUPS)
        .map(|_| {
            (0..KEY_GROUP_LEN)
                .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Decision for an activation request against the current license state
#[derive(Debug, PartialEq)]
pub enum ActivationOutcome {
    /// A live activation for this fingerprint already exists
    Heartbeat(Uuid),
    /// Room under the cap; insert a new activation row
    New,
}

/// Pure activation decision: callable without a database for testing and
/// reused inside the locked transaction
pub fn evaluate_activation(
    license: &License,
    live: &[LicenseActivation],
    fingerprint: &str,
    now: DateTime<Utc>,
) -> Result<ActivationOutcome, LicenseError> {
    match license.status_enum() {
        LicenseStatus::Active => {},
        LicenseStatus::Revoked => return Err(LicenseError::NotActive),
        LicenseStatus::Expired => return Err(LicenseError::NotActive),
    }
    if license.is_expired_at(now) {
        return Err(LicenseError::Expired);
    }

    if let Some(existing) = live
        .iter()
        .find(|a| a.is_live() && a.machine_fingerprint == fingerprint)
    {
        return Ok(ActivationOutcome::Heartbeat(existing.id));
    }

    let live_count = live.iter().filter(|a| a.is_live()).count() as i32;
    if license.max_activations > 0 && live_count >= license.max_activations {
        return Err(LicenseError::ActivationLimitReached);
    }

    Ok(ActivationOutcome::New)
}

/// Result of a validation call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub valid: bool,
    pub status: LicenseStatus,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Pure validation verdict over the loaded state
pub fn evaluate_validation(
    license: &License,
    has_live_activation: bool,
    now: DateTime<Utc>,
) -> ValidationVerdict {
    let status = license.status_enum();

    let reason = if status != LicenseStatus::Active {
        Some(format!("license is {}", status.as_str().to_lowercase()))
    } else if license.is_expired_at(now) {
        Some("license has expired".to_string())
    } else if !has_live_activation {
        Some("no activation for this machine".to_string())
    } else {
        None
    };

    ValidationVerdict {
        valid: reason.is_none(),
        status,
        expires_at: license.expires_at,
        reason,
    }
}

pub struct LicenseService {
    db_pool: DieselPool,
    settings: LicenseSettings,
}

impl LicenseService {
    pub fn new(db_pool: DieselPool, settings: LicenseSettings) -> Self {
        Self { db_pool, settings }
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
        LicenseError,
    > {
        self.db_pool
            .get()
            .await
            .map_err(|e| LicenseError::Database(e.to_string()))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Issue a new license for a user. Creating an already-expired license
    /// is rejected; the single-active policy is applied when configured.
    pub async fn create(
        &self,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
        max_activations: Option<i32>,
    ) -> Result<License, LicenseError> {
        if expires_at <= Utc::now() {
            return Err(LicenseError::InvalidExpiry);
        }

        let mut conn = self.conn().await?;
        let enforce_single = self.settings.enforce_single_active;
        let max_activations = max_activations.unwrap_or(self.settings.default_max_activations);

        conn.transaction::<License, LicenseError, _>(|tx| {
            Box::pin(async move {
                if enforce_single && License::count_active_for_user(tx, user_id).await? > 0 {
                    return Err(LicenseError::SingleActivePolicy);
                }

                let license = License::create(
                    tx,
                    NewLicense {
                        license_key: generate_license_key(),
                        user_id,
                        status: LicenseStatus::Active.as_str().to_string(),
                        expires_at,
                        max_activations,
                    },
                )
                .await?;

                Ok(license)
            })
        })
        .await
    }

    pub async fn get(&self, license_id: Uuid) -> Result<License, LicenseError> {
        let mut conn = self.conn().await?;
        Ok(License::find_by_id(&mut conn, license_id).await?)
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<License>, LicenseError> {
        let mut conn = self.conn().await?;
        Ok(License::list(&mut conn, limit, offset).await?)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<License>, LicenseError> {
        let mut conn = self.conn().await?;
        Ok(License::list_for_user(&mut conn, user_id).await?)
    }

    /// Renew: Active licenses extend, Expired licenses revive. Revoked is
    /// terminal.
    pub async fn renew(
        &self,
        license_id: Uuid,
        new_expires_at: DateTime<Utc>,
    ) -> Result<License, LicenseError> {
        if new_expires_at <= Utc::now() {
            return Err(LicenseError::InvalidExpiry);
        }

        let mut conn = self.conn().await?;
        let license = License::find_by_id(&mut conn, license_id).await?;

        if license.status_enum() == LicenseStatus::Revoked {
            return Err(LicenseError::RenewRevoked);
        }

        Ok(License::set_expiry(&mut conn, license_id, new_expires_at).await?)
    }

    pub async fn revoke(&self, license_id: Uuid) -> Result<License, LicenseError> {
        let mut conn = self.conn().await?;
        let license = License::find_by_id(&mut conn, license_id).await?;

        if license.status_enum() == LicenseStatus::Revoked {
            return Err(LicenseError::AlreadyRevoked);
        }

        Ok(License::set_status(&mut conn, license_id, LicenseStatus::Revoked, Some(Utc::now()))
            .await?)
    }

    /// Revoke a batch of licenses, skipping the already-revoked; returns the
    /// number actually transitioned
    pub async fn bulk_revoke(&self, license_ids: &[Uuid]) -> Result<usize, LicenseError> {
        let mut revoked = 0usize;
        for &license_id in license_ids {
            match self.revoke(license_id).await {
                Ok(_) => revoked += 1,
                Err(LicenseError::AlreadyRevoked | LicenseError::NotFound) => {},
                Err(e) => return Err(e),
            }
        }
        Ok(revoked)
    }

    pub async fn delete(&self, license_id: Uuid) -> Result<(), LicenseError> {
        let mut conn = self.conn().await?;
        Ok(License::delete(&mut conn, license_id).await?)
    }

    // ------------------------------------------------------------------
    // Activation / validation
    // ------------------------------------------------------------------

    /// Activate a machine on a license, or heartbeat the existing activation
    /// for this fingerprint. The license row is locked for the duration of
    /// the check-and-insert; a unique-violation on the live-pair index (seen
    /// only across failovers, where the lock could not serialize) retries as
    /// a heartbeat on a fresh transaction.
    pub async fn activate(
        &self,
        license_key: &str,
        fingerprint: &str,
        hostname: Option<String>,
        ip_address: Option<String>,
    ) -> Result<LicenseActivation, LicenseError> {
        match self
            .try_activate(license_key, fingerprint, hostname.clone(), ip_address.clone())
            .await
        {
            Err(LicenseError::ActivationRace) => {
                // The fingerprint got its live row concurrently; this
                // request becomes the heartbeat
                let mut conn = self.conn().await?;
                let license = License::find_by_key(&mut conn, license_key).await?;
                match LicenseActivation::find_live(&mut conn, license.id, fingerprint).await? {
                    Some(existing) => Ok(LicenseActivation::touch(
                        &mut conn,
                        existing.id,
                        hostname,
                        ip_address,
                    )
                    .await?),
                    None => Err(LicenseError::ActivationLimitReached),
                }
            },
            other => other,
        }
    }

    async fn try_activate(
        &self,
        license_key: &str,
        fingerprint: &str,
        hostname: Option<String>,
        ip_address: Option<String>,
    ) -> Result<LicenseActivation, LicenseError> {
        let mut conn = self.conn().await?;
        let key = license_key.to_string();
        let fingerprint = fingerprint.to_string();

        conn.transaction::<LicenseActivation, LicenseError, _>(|tx| {
            Box::pin(async move {
                let license = License::find_by_key_for_update(tx, &key).await?;
                let live = LicenseActivation::live_for_license(tx, license.id).await?;

                match evaluate_activation(&license, &live, &fingerprint, Utc::now())? {
                    ActivationOutcome::Heartbeat(activation_id) => {
                        Ok(LicenseActivation::touch(tx, activation_id, hostname, ip_address)
                            .await?)
                    },
                    ActivationOutcome::New => LicenseActivation::insert(
                        tx,
                        NewLicenseActivation {
                            license_id: license.id,
                            machine_fingerprint: fingerprint,
                            hostname,
                            ip_address,
                        },
                    )
                    .await
                    .map_err(|e| match e {
                        ActivationError::Database(diesel::result::Error::DatabaseError(
                            DatabaseErrorKind::UniqueViolation,
                            _,
                        )) => LicenseError::ActivationRace,
                        other => other.into(),
                    }),
                }
            })
        })
        .await
    }

    /// Validation: valid iff Active, unexpired, and this fingerprint holds a
    /// live activation. Bumps last_seen_at on success.
    pub async fn validate(
        &self,
        license_key: &str,
        fingerprint: &str,
    ) -> Result<ValidationVerdict, LicenseError> {
        let mut conn = self.conn().await?;

        let license = License::find_by_key(&mut conn, license_key).await?;
        let activation = LicenseActivation::find_live(&mut conn, license.id, fingerprint).await?;

        let verdict = evaluate_validation(&license, activation.is_some(), Utc::now());

        if verdict.valid {
            if let Some(activation) = activation {
                LicenseActivation::touch_last_seen(&mut conn, activation.id).await?;
            }
        }

        Ok(verdict)
    }

    /// Heartbeat: refresh last_seen_at for the live activation without
    /// issuing a verdict. No-op when nothing is live.
    pub async fn heartbeat(&self, license_key: &str, fingerprint: &str) -> Result<(), LicenseError> {
        let mut conn = self.conn().await?;

        let license = License::find_by_key(&mut conn, license_key).await?;
        if let Some(activation) =
            LicenseActivation::find_live(&mut conn, license.id, fingerprint).await?
        {
            LicenseActivation::touch_last_seen(&mut conn, activation.id).await?;
        }
        Ok(())
    }

    /// Deactivate the live activation for (license, fingerprint). Returns
    /// whether anything was live; calling on nothing is a no-op.
    pub async fn deactivate(
        &self,
        license_key: &str,
        fingerprint: &str,
    ) -> Result<bool, LicenseError> {
        let mut conn = self.conn().await?;

        let license = License::find_by_key(&mut conn, license_key).await?;
        Ok(LicenseActivation::deactivate(&mut conn, license.id, fingerprint).await?)
    }

    pub async fn activations(&self, license_id: Uuid) -> Result<Vec<LicenseActivation>, LicenseError> {
        let mut conn = self.conn().await?;
        Ok(LicenseActivation::live_for_license(&mut conn, license_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::validation::LICENSE_KEY_PATTERN;
    use chrono::Duration;

    fn license(status: LicenseStatus, max_activations: i32) -> License {
        let now = Utc::now();
        License {
            id: Uuid::new_v4(),
            license_key: generate_license_key(),
            user_id: Uuid::new_v4(),
            status: status.as_str().to_string(),
            created_at: now,
            expires_at: now + Duration::days(30),
            revoked_at: None,
            max_activations,
        }
    }

    fn activation(license_id: Uuid, fingerprint: &str, live: bool) -> LicenseActivation {
        let now = Utc::now();
        LicenseActivation {
            id: Uuid::new_v4(),
            license_id,
            machine_fingerprint: fingerprint.to_string(),
            hostname: Some("host-1".to_string()),
            ip_address: Some("10.0.0.1".to_string()),
            activated_at: now,
            deactivated_at: if live { None } else { Some(now) },
            last_seen_at: now,
        }
    }

    #[test]
    fn test_generated_keys_match_format() {
        for _ in 0..100 {
            let key = generate_license_key();
            assert!(LICENSE_KEY_PATTERN.is_match(&key), "bad key: {}", key);
        }
    }

    #[test]
    fn test_sequential_keys_differ() {
        assert_ne!(generate_license_key(), generate_license_key());
    }

    #[test]
    fn test_activation_new_under_cap() {
        let lic = license(LicenseStatus::Active, 2);
        let live = vec![activation(lic.id, "fp-A", true)];

        assert_eq!(
            evaluate_activation(&lic, &live, "fp-B", Utc::now()),
            Ok(ActivationOutcome::New)
        );
    }

    #[test]
    fn test_activation_cap_reached() {
        let lic = license(LicenseStatus::Active, 2);
        let live = vec![activation(lic.id, "fp-A", true), activation(lic.id, "fp-B", true)];

        assert_eq!(
            evaluate_activation(&lic, &live, "fp-C", Utc::now()),
            Err(LicenseError::ActivationLimitReached)
        );
    }

    #[test]
    fn test_activation_existing_fingerprint_is_heartbeat_even_at_cap() {
        let lic = license(LicenseStatus::Active, 2);
        let a = activation(lic.id, "fp-A", true);
        let live = vec![a.clone(), activation(lic.id, "fp-B", true)];

        assert_eq!(
            evaluate_activation(&lic, &live, "fp-A", Utc::now()),
            Ok(ActivationOutcome::Heartbeat(a.id))
        );
    }

    #[test]
    fn test_deactivated_rows_do_not_count_against_cap() {
        let lic = license(LicenseStatus::Active, 1);
        let live = vec![activation(lic.id, "fp-A", false)];

        assert_eq!(
            evaluate_activation(&lic, &live, "fp-B", Utc::now()),
            Ok(ActivationOutcome::New)
        );
    }

    #[test]
    fn test_unlimited_activations_when_cap_is_zero() {
        let lic = license(LicenseStatus::Active, 0);
        let live: Vec<LicenseActivation> =
            (0..50).map(|i| activation(lic.id, &format!("fp-{}", i), true)).collect();

        assert_eq!(
            evaluate_activation(&lic, &live, "fp-new", Utc::now()),
            Ok(ActivationOutcome::New)
        );
    }

    #[test]
    fn test_activation_rejected_for_inactive_license() {
        for status in [LicenseStatus::Expired, LicenseStatus::Revoked] {
            let lic = license(status, 5);
            assert_eq!(
                evaluate_activation(&lic, &[], "fp-A", Utc::now()),
                Err(LicenseError::NotActive)
            );
        }
    }

    #[test]
    fn test_activation_rejected_at_exact_expiry() {
        let mut lic = license(LicenseStatus::Active, 5);
        lic.expires_at = Utc::now();
        assert_eq!(
            evaluate_activation(&lic, &[], "fp-A", lic.expires_at),
            Err(LicenseError::Expired)
        );
    }

    #[test]
    fn test_validation_verdicts() {
        let lic = license(LicenseStatus::Active, 1);
        let now = Utc::now();

        let ok = evaluate_validation(&lic, true, now);
        assert!(ok.valid);
        assert!(ok.reason.is_none());

        let no_activation = evaluate_validation(&lic, false, now);
        assert!(!no_activation.valid);
        assert_eq!(no_activation.reason.as_deref(), Some("no activation for this machine"));

        let mut expired = license(LicenseStatus::Active, 1);
        expired.expires_at = now;
        let verdict = evaluate_validation(&expired, true, now);
        assert!(!verdict.valid);
        assert_eq!(verdict.reason.as_deref(), Some("license has expired"));

        let revoked = license(LicenseStatus::Revoked, 1);
        let verdict = evaluate_validation(&revoked, true, now);
        assert!(!verdict.valid);
        assert_eq!(verdict.reason.as_deref(), Some("license is revoked"));
    }
}
