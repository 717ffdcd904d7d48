// License endpoints.
//
// The admin surface manages the lifecycle (issue, renew, revoke, delete,
// bulk revoke). The client surface drives activations: the license key is
// the credential there, so those endpoints are anonymous but sit behind the
// edge throttle.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use uuid::Uuid;
use validator::Validate;

use super::audit;
use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    models::audit_log::NewAuditLog,
    utils::{
        api_response::{validation_errors_to_map, ApiResponse},
        validation::{validate_fingerprint, validate_license_key_format},
    },
};

// =============================================================================
// REQUEST TYPES
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateLicenseRequest {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    #[validate(range(min = 0, message = "maxActivations must not be negative"))]
    pub max_activations: Option<i32>,
}

/// PATCH body: a new expiry renews, `revoked: true` revokes
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLicenseRequest {
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRevokeRequest {
    pub license_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    #[validate(custom(function = "validate_license_key_format"))]
    pub license_key: String,

    #[validate(custom(function = "validate_fingerprint"))]
    pub fingerprint: String,

    #[validate(length(max = 255, message = "Hostname must be less than 255 characters"))]
    pub hostname: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LicenseCheckRequest {
    #[validate(custom(function = "validate_license_key_format"))]
    pub license_key: String,

    #[validate(custom(function = "validate_fingerprint"))]
    pub fingerprint: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageQuery {
    pub fn limits(&self) -> (i64, i64) {
        let per_page = self.per_page.unwrap_or(50).clamp(1, 200);
        let page = self.page.unwrap_or(1).max(1);
        (per_page, (page - 1) * per_page)
    }
}

// =============================================================================
// ADMIN HANDLERS
// =============================================================================

/// POST /licenses - issue a license for a user
pub async fn create(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Json(request): Json<CreateLicenseRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return ApiResponse::validation_failed(validation_errors_to_map(&errors));
    }

    let license = match state
        .license_service
        .create(request.user_id, request.expires_at, request.max_activations)
        .await
    {
        Ok(license) => license,
        Err(e) => return crate::utils::service_error::ServiceError::from(e).into_response(),
    };

    audit(
        &state,
        NewAuditLog::new("license_created", "license")
            .entity(license.id)
            .user(admin.user_id)
            .details(json!({ "licenseUserId": license.user_id, "expiresAt": license.expires_at })),
    )
    .await;

    ApiResponse::created(license).into_response()
}

/// GET /licenses
pub async fn list(State(state): State<AppState>, Query(page): Query<PageQuery>) -> Response {
    let (limit, offset) = page.limits();
    match state.license_service.list(limit, offset).await {
        Ok(licenses) => ApiResponse::ok(licenses).into_response(),
        Err(e) => crate::utils::service_error::ServiceError::from(e).into_response(),
    }
}

/// GET /licenses/{id} - license with its live activations
pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let license = match state.license_service.get(id).await {
        Ok(license) => license,
        Err(e) => return crate::utils::service_error::ServiceError::from(e).into_response(),
    };

    let activations = match state.license_service.activations(id).await {
        Ok(activations) => activations,
        Err(e) => return crate::utils::service_error::ServiceError::from(e).into_response(),
    };

    ApiResponse::ok(json!({ "license": license, "activations": activations })).into_response()
}

/// PATCH /licenses/{id} - renew or revoke
pub async fn update(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateLicenseRequest>,
) -> Response {
    if request.revoked == Some(true) {
        let license = match state.license_service.revoke(id).await {
            Ok(license) => license,
            Err(e) => return crate::utils::service_error::ServiceError::from(e).into_response(),
        };

        audit(
            &state,
            NewAuditLog::new("license_revoked", "license")
                .entity(id)
                .user(admin.user_id),
        )
        .await;

        return ApiResponse::ok(license).into_response();
    }

    if let Some(expires_at) = request.expires_at {
        let license = match state.license_service.renew(id, expires_at).await {
            Ok(license) => license,
            Err(e) => return crate::utils::service_error::ServiceError::from(e).into_response(),
        };

        audit(
            &state,
            NewAuditLog::new("license_renewed", "license")
                .entity(id)
                .user(admin.user_id)
                .details(json!({ "expiresAt": expires_at })),
        )
        .await;

        return ApiResponse::ok(license).into_response();
    }

    ApiResponse::error(
        axum::http::StatusCode::BAD_REQUEST,
        "Nothing to update: provide expiresAt or revoked",
    )
}

/// DELETE /licenses/{id}
pub async fn delete(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Response {
    if let Err(e) = state.license_service.delete(id).await {
        return crate::utils::service_error::ServiceError::from(e).into_response();
    }

    audit(
        &state,
        NewAuditLog::new("license_deleted", "license")
            .entity(id)
            .user(admin.user_id),
    )
    .await;

    ApiResponse::message("License deleted").into_response()
}

/// POST /licenses/bulk-revoke
pub async fn bulk_revoke(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Json(request): Json<BulkRevokeRequest>,
) -> Response {
    let revoked = match state.license_service.bulk_revoke(&request.license_ids).await {
        Ok(revoked) => revoked,
        Err(e) => return crate::utils::service_error::ServiceError::from(e).into_response(),
    };

    audit(
        &state,
        NewAuditLog::new("license_bulk_revoked", "license")
            .user(admin.user_id)
            .details(json!({ "requested": request.license_ids.len(), "revoked": revoked })),
    )
    .await;

    ApiResponse::ok(json!({ "revoked": revoked })).into_response()
}

// =============================================================================
// CLIENT HANDLERS
// =============================================================================

/// POST /licenses/activate - activate this machine or heartbeat an existing
/// activation
pub async fn activate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ActivateRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return ApiResponse::validation_failed(validation_errors_to_map(&errors));
    }

    let activation = match state
        .license_service
        .activate(
            &request.license_key,
            &request.fingerprint,
            request.hostname,
            Some(addr.ip().to_string()),
        )
        .await
    {
        Ok(activation) => activation,
        Err(e) => return crate::utils::service_error::ServiceError::from(e).into_response(),
    };

    audit(
        &state,
        NewAuditLog::new("license_activated", "activation")
            .entity(activation.id)
            .ip(Some(addr.ip().to_string())),
    )
    .await;

    ApiResponse::ok(activation).into_response()
}

/// POST /licenses/validate
pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<LicenseCheckRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return ApiResponse::validation_failed(validation_errors_to_map(&errors));
    }

    match state
        .license_service
        .validate(&request.license_key, &request.fingerprint)
        .await
    {
        Ok(verdict) => ApiResponse::ok(verdict).into_response(),
        Err(e) => crate::utils::service_error::ServiceError::from(e).into_response(),
    }
}

/// POST /licenses/deactivate - no-op when nothing is live
pub async fn deactivate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<LicenseCheckRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return ApiResponse::validation_failed(validation_errors_to_map(&errors));
    }

    let was_live = match state
        .license_service
        .deactivate(&request.license_key, &request.fingerprint)
        .await
    {
        Ok(was_live) => was_live,
        Err(e) => return crate::utils::service_error::ServiceError::from(e).into_response(),
    };

    if was_live {
        audit(
            &state,
            NewAuditLog::new("license_deactivated", "activation").ip(Some(addr.ip().to_string())),
        )
        .await;
    }

    ApiResponse::ok(json!({ "deactivated": was_live })).into_response()
}

/// POST /licenses/heartbeat - refresh last_seen_at without a verdict
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<LicenseCheckRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return ApiResponse::validation_failed(validation_errors_to_map(&errors));
    }

    match state
        .license_service
        .heartbeat(&request.license_key, &request.fingerprint)
        .await
    {
        Ok(()) => ApiResponse::message("Heartbeat recorded").into_response(),
        Err(e) => crate::utils::service_error::ServiceError::from(e).into_response(),
    }
}
