// Authentication endpoints: login, registration, refresh, logout, password
// management, email verification, and the caller's own profile.
//
// Credentials travel in HTTP-only cookies. The forgot-password and
// resend-verification endpoints answer with the same shape whether or not
// the account exists; the service-level errors are swallowed here.

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use validator::Validate;

use super::audit;
use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    models::audit_log::NewAuditLog,
    services::auth::NotificationPreferences,
    utils::{
        api_response::{validation_errors_to_map, ApiResponse},
        cookies::{build_access_cookie, build_refresh_cookie, clear_auth_cookies, REFRESH_COOKIE},
        service_error::ServiceError,
        validation::{validate_password_policy, validate_username},
    },
};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    #[validate(length(max = 320, message = "Email must be less than 320 characters"))]
    pub email: String,

    #[validate(custom(function = "validate_password_policy"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,

    #[validate(custom(function = "validate_password_policy"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,

    #[validate(custom(function = "validate_password_policy"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_token_expires: DateTime<Utc>,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Response {
    // Single-browser rule: a presented refresh cookie is revoked before a
    // fresh session is issued
    let presented = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());

    let (pair, user) = match state
        .auth_service
        .login(&request.username, &request.password, presented.as_deref())
        .await
    {
        Ok(result) => result,
        Err(e) => return e.into_response(),
    };

    audit(
        &state,
        NewAuditLog::new("login", "user")
            .entity(user.id)
            .user(user.id)
            .ip(Some(addr.ip().to_string())),
    )
    .await;

    let jar = jar
        .add(build_access_cookie(pair.access_token.clone(), pair.access_expires_at))
        .add(build_refresh_cookie(pair.refresh_token.clone(), pair.refresh_expires_at));

    (
        jar,
        ApiResponse::ok_with_message(
            SessionResponse {
                access_token_expires: pair.access_expires_at,
            },
            "Login successful",
        ),
    )
        .into_response()
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return ApiResponse::validation_failed(validation_errors_to_map(&errors));
    }

    let user = match state
        .auth_service
        .register(&request.username, &request.email, &request.password)
        .await
    {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    audit(
        &state,
        NewAuditLog::new("register", "user")
            .entity(user.id)
            .user(user.id)
            .ip(Some(addr.ip().to_string())),
    )
    .await;

    ApiResponse::created(json!({ "userId": user.id })).into_response()
}

/// POST /auth/refresh - rotate the refresh cookie into a new pair
pub async fn refresh(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(token) = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()) else {
        return ApiResponse::error(StatusCode::UNAUTHORIZED, "Refresh token not provided");
    };

    let pair = match state.token_service.refresh(&token).await {
        Ok(pair) => pair,
        Err(e) => {
            // A dead refresh token is useless to the browser; drop both
            // cookies along with the 401
            let (access, refresh) = clear_auth_cookies();
            let jar = CookieJar::new().add(access).add(refresh);
            return (jar, ServiceError::from(e).into_response()).into_response();
        },
    };

    let jar = jar
        .add(build_access_cookie(pair.access_token.clone(), pair.access_expires_at))
        .add(build_refresh_cookie(pair.refresh_token.clone(), pair.refresh_expires_at));

    (
        jar,
        ApiResponse::ok_with_message(
            SessionResponse {
                access_token_expires: pair.access_expires_at,
            },
            "Tokens refreshed",
        ),
    )
        .into_response()
}

/// POST /auth/logout - revoke the current session
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: CookieJar,
) -> Response {
    if let Err(e) = state.token_service.revoke_session(user.user_id, &user.jti).await {
        return ServiceError::from(e).into_response();
    }

    let (access, refresh) = clear_auth_cookies();
    let jar = jar.add(access).add(refresh);
    (jar, ApiResponse::message("Logged out")).into_response()
}

/// POST /auth/logout-all - revoke every session of the caller
pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: CookieJar,
) -> Response {
    let revoked = match state.token_service.revoke_all_sessions(user.user_id).await {
        Ok(revoked) => revoked,
        Err(e) => return ServiceError::from(e).into_response(),
    };

    audit(
        &state,
        NewAuditLog::new("logout_all", "user")
            .entity(user.user_id)
            .user(user.user_id)
            .details(json!({ "revokedSessions": revoked })),
    )
    .await;

    let (access, refresh) = clear_auth_cookies();
    let jar = jar.add(access).add(refresh);
    (
        jar,
        ApiResponse::ok_with_message(json!({ "revokedSessions": revoked }), "All sessions revoked"),
    )
        .into_response()
}

/// POST /auth/change-password
pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ChangePasswordRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return ApiResponse::validation_failed(validation_errors_to_map(&errors));
    }

    if let Err(e) = state
        .auth_service
        .change_password(user.user_id, &request.current_password, &request.new_password)
        .await
    {
        return e.into_response();
    }

    audit(
        &state,
        NewAuditLog::new("change_password", "user")
            .entity(user.user_id)
            .user(user.user_id)
            .ip(Some(addr.ip().to_string())),
    )
    .await;

    // Every session is gone now, including this one
    let (access, refresh) = clear_auth_cookies();
    let jar = CookieJar::new().add(access).add(refresh);
    (jar, ApiResponse::message("Password changed; please log in again")).into_response()
}

/// POST /auth/verify-email
pub async fn verify_email(
    State(state): State<AppState>,
    Json(request): Json<VerifyEmailRequest>,
) -> Response {
    match state.auth_service.verify_email(&request.token).await {
        Ok(_) => ApiResponse::message("Email verified").into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /auth/resend-verification - uniform response, no account probing
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(request): Json<EmailRequest>,
) -> Response {
    match state.auth_service.resend_verification(&request.email).await {
        Ok(())
        | Err(ServiceError::NotFound(_))
        | Err(ServiceError::Conflict(_)) => {},
        Err(e) => return e.into_response(),
    }

    ApiResponse::message("If the address is registered, a verification email has been sent")
        .into_response()
}

/// POST /auth/forgot-password - uniform response, no account probing
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<EmailRequest>,
) -> Response {
    match state.auth_service.forgot_password(&request.email).await {
        Ok(()) | Err(ServiceError::NotFound(_)) => {},
        Err(e) => return e.into_response(),
    }

    ApiResponse::message("If the address is registered, a reset email has been sent")
        .into_response()
}

/// POST /auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<ResetPasswordRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return ApiResponse::validation_failed(validation_errors_to_map(&errors));
    }

    if let Err(e) = state
        .auth_service
        .reset_password(&request.token, &request.new_password)
        .await
    {
        return e.into_response();
    }

    audit(
        &state,
        NewAuditLog::new("reset_password", "user").ip(Some(addr.ip().to_string())),
    )
    .await;

    ApiResponse::message("Password reset; please log in").into_response()
}

/// GET /auth/me
pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> Response {
    match state.auth_service.get_profile(user.user_id).await {
        Ok(profile) => ApiResponse::ok(profile).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PUT /auth/profile
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Response {
    if let Err(errors) = request.validate() {
        return ApiResponse::validation_failed(validation_errors_to_map(&errors));
    }

    match state
        .auth_service
        .update_profile(user.user_id, request.email)
        .await
    {
        Ok(profile) => ApiResponse::ok(profile).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /auth/notifications
pub async fn get_notifications(State(state): State<AppState>, user: AuthenticatedUser) -> Response {
    match state.auth_service.get_notifications(user.user_id).await {
        Ok(prefs) => ApiResponse::ok(prefs).into_response(),
        Err(e) => e.into_response(),
    }
}

/// PUT /auth/notifications
pub async fn update_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(prefs): Json<NotificationPreferences>,
) -> Response {
    match state.auth_service.update_notifications(user.user_id, prefs).await {
        Ok(prefs) => ApiResponse::ok(prefs).into_response(),
        Err(e) => e.into_response(),
    }
}
