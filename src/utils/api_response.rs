// Standard response envelope shared by every endpoint:
// { success, statusCode, message?, data?, errors? }

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<HashMap<String, Vec<String>>>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                status_code: 200,
                message: None,
                data: Some(data),
                errors: None,
            }),
        )
    }

    pub fn created(data: T) -> (StatusCode, Json<Self>) {
        (
            StatusCode::CREATED,
            Json(Self {
                success: true,
                status_code: 201,
                message: None,
                data: Some(data),
                errors: None,
            }),
        )
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                status_code: 200,
                message: Some(message.into()),
                data: Some(data),
                errors: None,
            }),
        )
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                status_code: 200,
                message: Some(message.into()),
                data: None,
                errors: None,
            }),
        )
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Response {
        (
            status,
            Json(Self {
                success: false,
                status_code: status.as_u16(),
                message: Some(message.into()),
                data: None,
                errors: None,
            }),
        )
            .into_response()
    }

    pub fn validation_failed(errors: HashMap<String, Vec<String>>) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(Self {
                success: false,
                status_code: 400,
                message: Some("Validation failed".to_string()),
                data: None,
                errors: Some(errors),
            }),
        )
            .into_response()
    }
}

/// Convert validator's error set into the envelope's per-field map
pub fn validation_errors_to_map(errors: &validator::ValidationErrors) -> HashMap<String, Vec<String>> {
    errors
        .field_errors()
        .iter()
        .map(|(field, errs)| {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            (field.to_string(), messages)
        })
        .collect()
}
