// Service-level error taxonomy and its HTTP mapping.
// Auth paths never reveal whether a user exists: wrong username, wrong
// password and missing user all surface as InvalidCredentials.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use thiserror::Error;
use tracing::error;

use super::api_response::ApiResponse;
use crate::cache::CacheError;

/// Whether 500-class responses include backend details. Set once at startup
/// from the environment; defaults to hiding details.
static EXPOSE_DETAILS: OnceCell<bool> = OnceCell::new();

pub fn set_expose_details(expose: bool) {
    let _ = EXPOSE_DETAILS.set(expose);
}

fn expose_details() -> bool {
    *EXPOSE_DETAILS.get().unwrap_or(&false)
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is blocked")]
    AccountBlocked,

    #[error("Token not found or invalid")]
    TokenNotFound,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Validation failed")]
    ValidationFailed(HashMap<String, Vec<String>>),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Activation limit reached")]
    ActivationLimitReached,

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Database unavailable: {0}")]
    DbUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidCredentials => StatusCode::BAD_REQUEST,
            ServiceError::AccountBlocked => StatusCode::FORBIDDEN,
            ServiceError::TokenNotFound
            | ServiceError::TokenRevoked
            | ServiceError::TokenExpired
            | ServiceError::TokenInvalid => StatusCode::UNAUTHORIZED,
            ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::BAD_REQUEST,
            ServiceError::ActivationLimitReached => StatusCode::BAD_REQUEST,
            ServiceError::CacheUnavailable(_)
            | ServiceError::DbUnavailable(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Outward message. 500-class details stay in the logs unless the
    /// development flag was set at startup.
    fn client_message(&self) -> String {
        match self {
            ServiceError::CacheUnavailable(detail)
            | ServiceError::DbUnavailable(detail)
            | ServiceError::Internal(detail) => {
                if expose_details() {
                    detail.clone()
                } else {
                    "Internal server error".to_string()
                }
            },
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!("request failed: {}", self);
        }

        match self {
            ServiceError::ValidationFailed(errors) => ApiResponse::validation_failed(errors),
            other => ApiResponse::error(status, other.client_message()),
        }
    }
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable(msg) => ServiceError::CacheUnavailable(msg),
            CacheError::Serialization(msg) => ServiceError::Internal(msg),
        }
    }
}

impl From<diesel::result::Error> for ServiceError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => ServiceError::NotFound("entity"),
            other => ServiceError::DbUnavailable(other.to_string()),
        }
    }
}

impl From<super::password::PasswordError> for ServiceError {
    fn from(err: super::password::PasswordError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceError::InvalidCredentials.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ServiceError::AccountBlocked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ServiceError::TokenRevoked.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServiceError::NotFound("user").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServiceError::ActivationLimitReached.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::CacheUnavailable("down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_hidden_by_default() {
        let err = ServiceError::DbUnavailable("connection refused to 10.0.0.5".into());
        assert_eq!(err.client_message(), "Internal server error");
    }
}
