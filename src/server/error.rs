//! Errors for the management server: startup failures and API responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::cloudformation::CloudFormationError;

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Raised when `AWS_ACCOUNT_CREDENTIALS` cannot be decoded.
    #[error("invalid account credentials in {var}: {message}")]
    Accounts {
        /// Variable that was read.
        var: &'static str,
        /// Decoder message.
        message: String,
    },
    /// Raised when the caller identity or template description lookup fails.
    #[error("startup lookup failed: {0}")]
    Lookup(#[from] CloudFormationError),
    /// Raised when the listener cannot bind.
    #[error("failed to bind {addr}: {message}")]
    Bind {
        /// Requested address.
        addr: String,
        /// OS error message.
        message: String,
    },
    /// Raised when serving stops with an error.
    #[error("server stopped: {0}")]
    Serve(String),
}

/// Failure of a single API request.
#[derive(Debug)]
pub enum ApiError {
    /// The account is not one the server manages, or a resource is absent.
    NotFound(String),
    /// The request could not be carried out as asked.
    BadRequest(String),
    /// Any other failure.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Result type returned by handlers.
pub type ApiResult<T> = Result<T, ApiError>;
