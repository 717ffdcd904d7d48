// Library exports for the KeyGate backend

pub mod app;
pub mod app_config;
pub mod cache;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use app::AppState;
pub use app_config::{AppConfig, CONFIG};
pub use cache::{CacheError, KvStore, MemoryKvStore, RedisKvStore, SharedKvStore};
pub use db::{DieselPool, RedisConfig, RedisPool};
pub use middleware::AuthenticatedUser;
pub use models::session::{AccessTokenClaims, RefreshTokenRecord};
pub use services::{
    AuthService, LicenseService, SessionStore, ThrottleDecision, ThrottleService, ThrottleTier,
    TokenPair, TokenService,
};
pub use utils::{hash_token, ApiResponse, ServiceError};

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware as axum_middleware;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    admin_routes, license_admin_routes, license_client_routes, protected_auth_routes,
    public_auth_routes,
};
use crate::middleware::{
    admin_middleware, auth_middleware, cors_middleware, edge_throttle_middleware,
    security_headers_middleware, user_throttle_middleware,
};

/// Assemble the full application router.
///
/// Layer order (outermost first): tracing, security headers, CORS, edge
/// throttle. Protected routers additionally run auth -> user throttle ->
/// (admin guard) before their handlers.
pub fn build_router(state: AppState) -> Router {
    let protected_auth = protected_auth_routes()
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            user_throttle_middleware,
        ))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    let auth_router = public_auth_routes().merge(protected_auth);

    let license_router = license_client_routes().merge(
        license_admin_routes()
            .route_layer(axum_middleware::from_fn(admin_middleware))
            .route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                user_throttle_middleware,
            ))
            .route_layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware)),
    );

    let admin_router = admin_routes()
        .route_layer(axum_middleware::from_fn(admin_middleware))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            user_throttle_middleware,
        ))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/api/v1/health", get(health_check))
        .nest("/api/v1/auth", auth_router)
        .nest("/api/v1/licenses", license_router)
        .nest("/api/v1", admin_router)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(security_headers_middleware))
                .layer(axum_middleware::from_fn(cors_middleware))
                .layer(axum_middleware::from_fn_with_state(
                    state.clone(),
                    edge_throttle_middleware,
                )),
        )
        .with_state(state)
}

/// GET /api/v1/health - liveness summary (detailed view is admin-only)
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut healthy = true;

    if db::check_diesel_health(&state.diesel_pool).await.is_err() {
        healthy = false;
    }

    if let Some(redis) = &state.redis_pool {
        if !redis.health_check().await.is_healthy {
            healthy = false;
        }
    }

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": "keygate-backend",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    if healthy {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}
