//! Error types for the coderun server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use coderun_core::{ErrorKind, ExecutionError};
use serde::Serialize;
use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur in the coderun server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The execution pipeline failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Invalid request format
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Request body over the configured limit
    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    /// Server configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// JSON body of every failed `/run` request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
}

impl ServerError {
    /// Create a new invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a new configuration error.
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Execution(e) => e.kind(),
            ServerError::InvalidRequest(_) | ServerError::PayloadTooLarge(_) => ErrorKind::BadRequest,
            ServerError::Config(_) | ServerError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        if let ServerError::PayloadTooLarge(_) = self {
            return StatusCode::PAYLOAD_TOO_LARGE;
        }
        match self.kind() {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Message safe to show to the caller. Daemon and filesystem details stay
    /// in the server log.
    pub fn public_message(&self) -> String {
        match self {
            ServerError::Execution(e) => e.public_message(),
            ServerError::InvalidRequest(msg) | ServerError::PayloadTooLarge(msg) => msg.clone(),
            ServerError::Config(_) | ServerError::Internal(_) => {
                "Error executing code.".to_string()
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        let partial = match self {
            ServerError::Execution(e) => e.partial_output(),
            _ => None,
        };
        ErrorBody {
            error: self.error_type(),
            message: self.public_message(),
            output: partial.map(str::to_string),
            truncated: partial.map(|_| true),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            log::error!("Request failed: {}", self);
        }
        (self.status_code(), Json(self.body())).into_response()
    }
}
