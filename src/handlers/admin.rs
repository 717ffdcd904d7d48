// Admin surface: user management, audit trail, service statistics, and
// detailed health. Everything here sits behind the admin role guard.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::audit;
use super::licenses::PageQuery;
use crate::{
    app::AppState,
    db::check_diesel_health,
    middleware::auth::AuthenticatedUser,
    models::{
        activation::LicenseActivation,
        audit_log::{AuditLog, NewAuditLog},
        license::{License, LicenseStatus},
        user::{User, UserError},
    },
    services::license::LicenseError,
    utils::{api_response::ApiResponse, service_error::ServiceError},
};

/// GET /users - short-lived KV cache in front of the listing query
pub async fn list_users(State(state): State<AppState>, Query(page): Query<PageQuery>) -> Response {
    let (limit, offset) = page.limits();

    let cache_key = format!("users:list:{}:{}", limit, offset);
    let cache_ttl =
        std::time::Duration::from_secs(state.config.cache.users_list_expiration_minutes * 60);

    match crate::cache::get_json::<Vec<crate::services::auth::UserProfile>>(
        state.kv_store.as_ref(),
        &cache_key,
    )
    .await
    {
        Ok(Some(profiles)) => return ApiResponse::ok(profiles).into_response(),
        Ok(None) => {},
        Err(e) => return ServiceError::from(e).into_response(),
    }

    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    match User::list(&mut conn, limit, offset).await {
        Ok(users) => {
            let profiles: Vec<crate::services::auth::UserProfile> =
                users.iter().map(Into::into).collect();
            if let Err(e) =
                crate::cache::set_json(state.kv_store.as_ref(), &cache_key, &profiles, Some(cache_ttl))
                    .await
            {
                tracing::warn!("users list cache write failed: {}", e);
            }
            ApiResponse::ok(profiles).into_response()
        },
        Err(e) => ServiceError::DbUnavailable(e.to_string()).into_response(),
    }
}

/// GET /users/{id}/licenses
pub async fn user_licenses(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.license_service.list_for_user(id).await {
        Ok(licenses) => ApiResponse::ok(licenses).into_response(),
        Err(e) => ServiceError::from(e).into_response(),
    }
}

/// POST /users/{id}/block - block the account and kill its sessions
pub async fn block_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Response {
    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    let mut user = match User::find_by_id(&mut conn, id).await {
        Ok(user) => user,
        Err(UserError::NotFound) => return ServiceError::NotFound("user").into_response(),
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    let changed = match user.block() {
        Ok(changed) => changed,
        Err(e) => return ServiceError::Conflict(e.to_string()).into_response(),
    };

    if changed {
        if let Err(e) = user.save_status(&mut conn).await {
            return ServiceError::DbUnavailable(e.to_string()).into_response();
        }
        // A blocked account must not keep refreshing
        if let Err(e) = state.token_service.revoke_all_sessions(id).await {
            return ServiceError::from(e).into_response();
        }

        audit(
            &state,
            NewAuditLog::new("user_blocked", "user").entity(id).user(admin.user_id),
        )
        .await;
    }

    ApiResponse::message("User blocked").into_response()
}

/// POST /users/{id}/unblock
pub async fn unblock_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Response {
    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    let mut user = match User::find_by_id(&mut conn, id).await {
        Ok(user) => user,
        Err(UserError::NotFound) => return ServiceError::NotFound("user").into_response(),
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    let changed = match user.unblock() {
        Ok(changed) => changed,
        Err(e) => return ServiceError::Conflict(e.to_string()).into_response(),
    };

    if changed {
        if let Err(e) = user.save_status(&mut conn).await {
            return ServiceError::DbUnavailable(e.to_string()).into_response();
        }

        audit(
            &state,
            NewAuditLog::new("user_unblocked", "user").entity(id).user(admin.user_id),
        )
        .await;
    }

    ApiResponse::message("User unblocked").into_response()
}

/// DELETE /users/{id} - cascades to licenses and activations
pub async fn delete_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Response {
    if admin.user_id == id {
        return ApiResponse::error(StatusCode::BAD_REQUEST, "Cannot delete your own account");
    }

    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    match User::delete(&mut conn, id).await {
        Ok(()) => {},
        Err(UserError::NotFound) => return ServiceError::NotFound("user").into_response(),
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    }

    // Refresh records are not cascaded from SQL; revoke them explicitly
    if let Err(e) = state.token_service.revoke_all_sessions(id).await {
        return ServiceError::from(e).into_response();
    }

    audit(
        &state,
        NewAuditLog::new("user_deleted", "user").entity(id).user(admin.user_id),
    )
    .await;

    ApiResponse::message("User deleted").into_response()
}

/// GET /audit
pub async fn audit_log(State(state): State<AppState>, Query(page): Query<PageQuery>) -> Response {
    let (limit, offset) = page.limits();

    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    let entries = match AuditLog::list(&mut conn, limit, offset).await {
        Ok(entries) => entries,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };
    let total = match AuditLog::count(&mut conn).await {
        Ok(total) => total,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    ApiResponse::ok(json!({ "entries": entries, "total": total })).into_response()
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Response {
    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    let users = match User::count(&mut conn).await {
        Ok(count) => count,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    let mut licenses = serde_json::Map::new();
    for status in [LicenseStatus::Active, LicenseStatus::Expired, LicenseStatus::Revoked] {
        match License::count_by_status(&mut conn, status).await {
            Ok(count) => {
                licenses.insert(status.as_str().to_lowercase(), json!(count));
            },
            Err(e) => return ServiceError::from(LicenseError::from(e)).into_response(),
        }
    }

    let live_activations = match LicenseActivation::count_all_live(&mut conn).await {
        Ok(count) => count,
        Err(e) => return ServiceError::DbUnavailable(e.to_string()).into_response(),
    };

    let live_sessions = match state.token_service.sessions().count_live_sessions().await {
        Ok(count) => count,
        Err(e) => return ServiceError::from(e).into_response(),
    };

    ApiResponse::ok(json!({
        "users": users,
        "licenses": licenses,
        "liveActivations": live_activations,
        "liveSessions": live_sessions,
        "generatedAt": Utc::now(),
    }))
    .into_response()
}

/// GET /health/details - per-component health with latencies
pub async fn health_details(State(state): State<AppState>) -> Response {
    let mut overall_healthy = true;

    let postgres_health = match check_diesel_health(&state.diesel_pool).await {
        Ok(()) => json!({ "status": "healthy", "error": null }),
        Err(e) => {
            overall_healthy = false;
            json!({ "status": "unhealthy", "error": e.to_string() })
        },
    };

    let redis_health = match &state.redis_pool {
        Some(pool) => {
            let health = pool.health_check().await;
            if !health.is_healthy {
                overall_healthy = false;
            }
            json!({
                "status": if health.is_healthy { "healthy" } else { "unhealthy" },
                "latencyMs": health.latency_ms,
                "poolSize": health.pool_size,
                "error": health.error,
            })
        },
        None => json!({ "status": "disabled" }),
    };

    let body = json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "timestamp": Utc::now(),
        "components": {
            "postgresql": postgres_health,
            "redis": redis_health,
        }
    });

    let status = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body)).into_response()
}
