// Authentication middleware: validates the access token (cookie or bearer),
// then checks the session record is still alive before letting the request
// through. A valid signature is not enough; a revoked or rotated-away
// session invalidates its access token immediately.
//
// The login/refresh endpoints and everything anonymous live on routers that
// never mount this middleware, which is how those paths are bypassed.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;
use uuid::Uuid;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    utils::api_response::ApiResponse,
    utils::cookies::{clear_auth_cookies, ACCESS_COOKIE},
};

/// 401 that also tells the browser to drop both auth cookies
fn unauthorized(message: &str) -> Response {
    let (access, refresh) = clear_auth_cookies();
    let jar = CookieJar::new().add(access).add(refresh);
    (jar, ApiResponse::error(StatusCode::UNAUTHORIZED, message)).into_response()
}

fn extract_token(jar: &CookieJar, request: &Request<Body>) -> Option<String> {
    if let Some(cookie) = jar.get(ACCESS_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(String::from)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_token(&jar, &request) else {
        return unauthorized("Missing access token");
    };

    let claims = match state.token_service.validate_access(&token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Access token validation failed: {}", e);
            return unauthorized("Invalid or expired token");
        },
    };

    let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
        return unauthorized("Invalid or expired token");
    };

    // Session-liveness filter: the record must exist and be unrevoked
    match state.token_service.sessions().is_live(user_id, &claims.jti).await {
        Ok(true) => {},
        Ok(false) => {
            warn!(user_id = %user_id, "Access token rejected: session revoked or gone");
            return unauthorized("Session is no longer valid");
        },
        Err(e) => {
            return crate::utils::service_error::ServiceError::from(e).into_response();
        },
    }

    request.extensions_mut().insert(AuthenticatedUser {
        user_id,
        jti: claims.jti,
        email: claims.email,
        role: claims.role,
        exp: claims.exp,
    });

    next.run(request).await
}

/// Role guard for admin-only routers; mounted after `auth_middleware`
pub async fn admin_middleware(request: Request<Body>, next: Next) -> Response {
    match request.extensions().get::<AuthenticatedUser>() {
        Some(user) if user.is_admin() => next.run(request).await,
        Some(_) => ApiResponse::error(StatusCode::FORBIDDEN, "Admin role required"),
        None => unauthorized("Authentication required"),
    }
}
