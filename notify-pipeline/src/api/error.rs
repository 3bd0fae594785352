//! Error responses.
//!
//! Every failure is rendered as `{"error": "<message>"}` with a matching status.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::error::Error;

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// An HTTP status plus a client-facing message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => Self::bad_request(msg),
            Error::NotFound { entity_type, id } => {
                Self::not_found(format!("{entity_type} {id} not found"))
            }
            Error::QueueClosed => Self::service_unavailable("Notification pipeline is shutting down"),
            Error::Timeout(op) => {
                error!(operation = %op, "Request timed out");
                Self::service_unavailable("Store is busy, try again")
            }
            Error::DatabaseSqlx(_) | Error::Database(_) => {
                error!(error = %err, "Store request failed");
                Self::internal("Failed to access notifications")
            }
            other => {
                error!(error = %other, "Request failed");
                Self::internal("Internal server error")
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::routes::test_support::json;

    #[tokio::test]
    async fn renders_error_body() {
        let response = ApiError::bad_request("Missing required field: userId").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body, serde_json::json!({"error": "Missing required field: userId"}));
    }

    #[test]
    fn closed_queue_is_unavailable() {
        let api_err = ApiError::from(Error::QueueClosed);
        assert_eq!(api_err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn missing_entity_maps_to_not_found() {
        let api_err = ApiError::from(Error::not_found("Notification", "123"));
        assert_eq!(api_err.status, StatusCode::NOT_FOUND);
        assert_eq!(api_err.message, "Notification 123 not found");
    }

    #[test]
    fn database_details_are_not_leaked() {
        let api_err = ApiError::from(Error::Database("disk I/O error at page 7".to_string()));
        assert_eq!(api_err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api_err.message.contains("page 7"));
    }
}
