// Authenticated request identity, extracted from validated access-token
// claims and injected into request extensions by the auth middleware

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::json;
use uuid::Uuid;

use crate::app::AppState;
use crate::models::user::UserRole;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub jti: String,
    pub email: String,
    pub role: String,
    pub exp: u64,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin.as_str()
    }
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({
                        "success": false,
                        "statusCode": 401,
                        "message": "Authentication required"
                    })),
                )
            })
    }
}
