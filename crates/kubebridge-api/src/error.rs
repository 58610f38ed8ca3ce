//! Error types for the API gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Authentication failed (invalid or missing token)
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Request cannot be forwarded as sent
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Embedded API server failed to initialize
    #[error("embedded API server failed to start: {0}")]
    Startup(String),

    /// Kubeconfig could not be built or written
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Embedded API server run loop exited with an error
    #[error("embedded API server error: {0}")]
    Server(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status used when this error is rendered as a response
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Startup(_) | Error::Server(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Kubeconfig(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Return K8s-style Status response
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.to_string(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}
