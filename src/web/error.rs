//! Standardized API error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Machine-readable error code for API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    NotFound,
    BadRequest,
    Conflict,
    InternalError,
}

/// Standardized error response for all control-API endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable error code.
    pub code: ApiErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details (validation errors, field info, etc).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::BadRequest, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Conflict, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::InternalError, message)
    }

    fn status_code(&self) -> StatusCode {
        match self.code {
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorCode::Conflict => StatusCode::CONFLICT,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl From<(StatusCode, String)> for ApiError {
    fn from((status, message): (StatusCode, String)) -> Self {
        let code = match status {
            StatusCode::NOT_FOUND => ApiErrorCode::NotFound,
            StatusCode::BAD_REQUEST => ApiErrorCode::BadRequest,
            StatusCode::CONFLICT => ApiErrorCode::Conflict,
            _ => ApiErrorCode::InternalError,
        };
        Self::new(code, message)
    }
}

/// Converts a database error to an `ApiError`, logging the original cause.
pub fn db_error(context: &str, error: sqlx::Error) -> ApiError {
    tracing::error!(error = %error, context = context, "database error");
    ApiError::internal_error(format!("{context} failed"))
}

/// Converts a credential pool error to an `ApiError`.
pub fn pool_error(error: crate::error::PoolError) -> ApiError {
    match error {
        crate::error::PoolError::NotFound(id) => ApiError::not_found(format!("credential {id} not found")),
        crate::error::PoolError::Exhausted(search_type) => {
            ApiError::conflict(format!("no credential available for {search_type}"))
        }
        crate::error::PoolError::Database(e) => db_error("credential pool operation", e),
    }
}
