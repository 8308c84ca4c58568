//! Error types for Aervyn
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Application-wide error type
///
/// Federation failures are split by cause so callers can tell a
/// malformed request from a failed signature from an unreachable peer.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Signature verification failed (401)
    #[error("Invalid signature")]
    InvalidSignature,

    /// Public key could not be fetched or decoded (401)
    #[error("Key fetch failed: {0}")]
    KeyFetch(String),

    /// Malformed input (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Activity type with no handler; the activity stays stored (202)
    #[error("Unsupported activity type: {0}")]
    UnsupportedActivityType(String),

    /// Federation error (502)
    #[error("Federation error: {0}")]
    Federation(String),

    /// Remote server answered with a non-success status (502)
    #[error("Remote returned HTTP {status}: {body}")]
    RemoteStatus { status: u16, body: String },

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Short label used for logs and the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::InvalidSignature => "invalid_signature",
            AppError::KeyFetch(_) => "key_fetch",
            AppError::Validation(_) => "validation",
            AppError::UnsupportedActivityType(_) => "unsupported_activity",
            AppError::Federation(_) => "federation",
            AppError::RemoteStatus { .. } => "remote_status",
            AppError::HttpClient(_) => "http_client",
            AppError::Database(_) => "database",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::Unauthorized | AppError::InvalidSignature => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            AppError::KeyFetch(_) => (StatusCode::UNAUTHORIZED, "Key fetch failed".to_string()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UnsupportedActivityType(_) => (StatusCode::ACCEPTED, self.to_string()),
            AppError::Federation(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::RemoteStatus { status, .. } => (
                StatusCode::BAD_GATEWAY,
                format!("Remote returned HTTP {}", status),
            ),
            AppError::HttpClient(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.kind()]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failures_map_to_unauthorized() {
        for error in [
            AppError::InvalidSignature,
            AppError::Unauthorized,
            AppError::KeyFetch("no key".to_string()),
        ] {
            assert_eq!(error.into_response().status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn remote_status_maps_to_bad_gateway_and_keeps_body() {
        let error = AppError::RemoteStatus {
            status: 404,
            body: "gone".to_string(),
        };
        assert_eq!(error.to_string(), "Remote returned HTTP 404: gone");
        assert_eq!(error.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let response = AppError::Validation("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
