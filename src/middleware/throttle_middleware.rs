// Throttle wiring: the edge middleware runs the global tier (per client IP)
// and the auth tier (per IP+path on the credential endpoints) before
// anything else touches the request; the user tier runs on protected
// routers once authentication has established the subject. The first
// Blocked decision short-circuits with 429; every Throttled decision sleeps
// the request before it proceeds.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    services::throttle::{BlockInfo, ThrottleDecision, ThrottleTier},
    utils::service_error::ServiceError,
};

/// Credential endpoints that get the stricter auth tier
const AUTH_THROTTLED_PATHS: [&str; 2] = ["/api/v1/auth/login", "/api/v1/auth/register"];

/// 429 body: statusCode, message, remainingAttempts, nextAttemptInSeconds,
/// penaltyRemainingSeconds (when known), inPenalty
fn blocked_response(info: &BlockInfo) -> Response {
    let mut body = json!({
        "statusCode": 429,
        "message": "Too many requests. Please try again later.",
        "remainingAttempts": info.remaining_attempts,
        "nextAttemptInSeconds": info.next_attempt_in_seconds,
        "inPenalty": info.in_penalty,
    });
    if let Some(penalty_remaining) = info.penalty_remaining_seconds {
        body["penaltyRemainingSeconds"] = json!(penalty_remaining);
    }

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(&info.next_attempt_in_seconds.to_string()) {
        response.headers_mut().insert("Retry-After", value);
    }
    response
}

struct ThrottleHeaders {
    limit: u32,
    remaining: u32,
    delay_ms: u64,
}

/// Evaluate one tier: Ok(None) passes clean, Ok(Some) passed after a delay,
/// Err carries the finished 429/500 response
async fn run_tier(
    state: &AppState,
    tier: ThrottleTier,
    identity: &str,
) -> Result<Option<ThrottleHeaders>, Response> {
    match state.throttle_service.check(tier, identity).await {
        Ok(ThrottleDecision::Allowed { .. }) => Ok(None),
        Ok(ThrottleDecision::Throttled { delay_ms, limit, remaining }) => {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(Some(ThrottleHeaders { limit, remaining, delay_ms }))
        },
        Ok(ThrottleDecision::Blocked(info)) => Err(blocked_response(&info)),
        Err(e) => Err(ServiceError::from(match e {
            crate::services::throttle::ThrottleError::Cache(cache) => cache,
        })
        .into_response()),
    }
}

fn apply_headers(response: &mut Response, headers: &ThrottleHeaders) {
    let pairs = [
        ("X-RateLimit-Limit", headers.limit.to_string()),
        ("X-RateLimit-Remaining", headers.remaining.to_string()),
        ("X-Throttle-Delay", headers.delay_ms.to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(name, value);
        }
    }
}

/// Pre-auth throttling: global tier for every request, auth tier for the
/// credential endpoints
pub async fn edge_throttle_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = addr.ip().to_string();
    let path = request.uri().path().to_string();

    let global = match run_tier(&state, ThrottleTier::Global, &ip).await {
        Ok(headers) => headers,
        Err(response) => return response,
    };

    let auth = if AUTH_THROTTLED_PATHS.contains(&path.as_str()) {
        match run_tier(&state, ThrottleTier::Auth, &format!("{}:{}", ip, path)).await {
            Ok(headers) => headers,
            Err(response) => return response,
        }
    } else {
        None
    };

    let mut response = next.run(request).await;
    if let Some(headers) = auth.or(global) {
        apply_headers(&mut response, &headers);
    }
    response
}

/// Post-auth throttling: user tier keyed by the authenticated subject.
/// Mounted behind `auth_middleware` on protected routers.
pub async fn user_throttle_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(user) = request.extensions().get::<AuthenticatedUser>().cloned() else {
        // Unauthenticated requests never reach here; fall through untouched
        return next.run(request).await;
    };

    let throttled = match run_tier(&state, ThrottleTier::User, &user.user_id.to_string()).await {
        Ok(headers) => headers,
        Err(response) => return response,
    };

    let mut response = next.run(request).await;
    if let Some(headers) = throttled {
        apply_headers(&mut response, &headers);
    }
    response
}
