// HTTP handlers and route builders

pub mod admin;
pub mod auth;
pub mod licenses;

use axum::routing::{get, post};
use axum::Router;

use crate::app::AppState;
use crate::models::audit_log::{AuditLog, NewAuditLog};

/// Best-effort audit append; a failed insert never fails the request
pub(crate) async fn audit(state: &AppState, entry: NewAuditLog) {
    match state.diesel_pool.get().await {
        Ok(mut conn) => AuditLog::record(&mut conn, entry).await,
        Err(e) => tracing::warn!("Audit log skipped, no database connection: {}", e),
    }
}

/// Anonymous auth endpoints (the edge throttle still applies)
pub fn public_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/verify-email", post(auth::verify_email))
        .route("/resend-verification", post(auth::resend_verification))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
}

/// Auth endpoints that require a live session
pub fn protected_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/logout", post(auth::logout))
        .route("/logout-all", post(auth::logout_all))
        .route("/change-password", post(auth::change_password))
        .route("/me", get(auth::me))
        .route("/profile", axum::routing::put(auth::update_profile))
        .route(
            "/notifications",
            get(auth::get_notifications).put(auth::update_notifications),
        )
}

/// Client-facing license operations; the license key is the credential
pub fn license_client_routes() -> Router<AppState> {
    Router::new()
        .route("/activate", post(licenses::activate))
        .route("/validate", post(licenses::validate))
        .route("/deactivate", post(licenses::deactivate))
        .route("/heartbeat", post(licenses::heartbeat))
}

/// Admin license management
pub fn license_admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(licenses::create).get(licenses::list))
        .route("/bulk-revoke", post(licenses::bulk_revoke))
        .route(
            "/{id}",
            get(licenses::get)
                .patch(licenses::update)
                .delete(licenses::delete),
        )
}

/// Admin surface: users, audit trail, stats, detailed health
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(admin::list_users))
        .route("/users/{id}/licenses", get(admin::user_licenses))
        .route("/users/{id}/block", post(admin::block_user))
        .route("/users/{id}/unblock", post(admin::unblock_user))
        .route("/users/{id}", axum::routing::delete(admin::delete_user))
        .route("/audit", get(admin::audit_log))
        .route("/stats", get(admin::stats))
        .route("/health/details", get(admin::health_details))
}
