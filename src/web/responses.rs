//! HTTP response types and utilities
//!
//! Standardized JSON envelopes for API endpoints and the mapping from
//! [`AppError`] to status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

use crate::errors::{AppError, AppResult};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the operation was successful
    pub success: bool,
    /// Response data (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, String>>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error_with_details(message: String, details: HashMap<String, String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
            details: Some(details),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Helper function to convert AppResult to HTTP response
pub fn handle_result<T>(result: AppResult<T>) -> Response
where
    T: Serialize,
{
    match result {
        Ok(data) => ok(data).into_response(),
        Err(error) => handle_error(error).into_response(),
    }
}

/// Status code for an error.
pub fn error_status(error: &AppError) -> StatusCode {
    match error {
        AppError::Validation { .. } => StatusCode::BAD_REQUEST,
        AppError::NotFound { .. } => StatusCode::NOT_FOUND,
        AppError::Geometry(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AppError::Codec(_)
        | AppError::Transaction { .. }
        | AppError::Database(_)
        | AppError::Repository(_)
        | AppError::Cache(_)
        | AppError::Io(_)
        | AppError::Configuration { .. }
        | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert AppError to appropriate HTTP response
pub fn handle_error(error: AppError) -> Response {
    let status = error_status(&error);

    let message = match &error {
        AppError::Validation { message } => message.clone(),
        AppError::NotFound { resource, id } => format!("{} '{}' not found", resource, id),
        AppError::Geometry(e) => e.to_string(),
        AppError::Cancelled { operation } => format!("Operation cancelled: {}", operation),
        AppError::Codec(e) => format!("Image processing failed: {}", e),
        AppError::Transaction { message } => format!("Transaction failed: {}", message),
        AppError::Database(_) => "Database operation failed".to_string(),
        AppError::Repository(_) => "Data access failed".to_string(),
        AppError::Cache(_) => "Derivative cache failure".to_string(),
        AppError::Io(_) => "Storage operation failed".to_string(),
        AppError::Configuration { message } => format!("Configuration error: {}", message),
        AppError::Internal { message } => format!("Internal error: {}", message),
    };

    if status.is_server_error() {
        error!("Request failed: {}", error);
    }

    (status, Json(ApiResponse::<()>::error(message))).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        handle_error(self)
    }
}

/// Success response helpers
pub fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Liveness payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,
}

impl HealthResponse {
    pub fn new(database_ok: bool) -> Self {
        Self {
            status: if database_ok { "healthy" } else { "unhealthy" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: if database_ok { "connected" } else { "unavailable" }.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GeometryError;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&AppError::validation("bad ratio")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&AppError::not_found("image", "7")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&AppError::Geometry(GeometryError::EmptyOutput {
                width: 0,
                height: 3
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            error_status(&AppError::cancelled("upsert")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_status(&AppError::transaction("constraint")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_success_envelope_serializes_without_error_fields() {
        let json = serde_json::to_value(ApiResponse::success(5)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 5);
        assert!(json.get("error").is_none());
    }
}
