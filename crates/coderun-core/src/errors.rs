//! Error types for the sandboxed execution pipeline
//!
//! Failures are grouped by where they originate: the container runtime
//! collaborator (`RuntimeError`), the request pipeline (`ExecutionError`) and
//! configuration loading (`ConfigError`). Only `ExecutionError::public_message`
//! is ever handed to a caller; the `Display` text of every type here may carry
//! daemon diagnostics and is meant for server-side logs.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a `ContainerRuntime` implementation.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Container runtime unreachable: {0}")]
    Unavailable(String),
    #[error("Image not available: {0}")]
    ImageNotFound(String),
    #[error("Execution unit not found: {0}")]
    UnitNotFound(String),
    #[error("Output stream failed: {0}")]
    Stream(String),
    #[error("Bollard (Docker client) error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("Container runtime error: {0}")]
    Other(String),
}

impl RuntimeError {
    /// True when the runtime reports that the unit no longer exists.
    pub fn is_unit_not_found(&self) -> bool {
        match self {
            RuntimeError::UnitNotFound(_) => true,
            RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code,
                ..
            }) => *status_code == 404,
            _ => false,
        }
    }
}

/// Caller-facing classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    Overloaded,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal_error",
        }
    }
}

/// Terminal failure of one pass through the execution pipeline.
///
/// Cleanup failures never appear here: they are logged by the cleanup scope
/// and must not mask the primary outcome of the request.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("All {max_concurrent} execution slots are busy")]
    Overloaded { max_concurrent: usize },
    #[error("Workspace provisioning failed: {0}")]
    Provisioning(#[source] std::io::Error),
    #[error("Sandbox launch failed: {0}")]
    Launch(#[source] RuntimeError),
    #[error("Output capture failed: {source}")]
    Capture { source: RuntimeError, partial: String },
    #[error("Execution exceeded the {limit:?} deadline")]
    Timeout { limit: Duration, partial: String },
}

impl ExecutionError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::BadRequest(_) => ErrorKind::BadRequest,
            ExecutionError::Overloaded { .. } => ErrorKind::Overloaded,
            ExecutionError::Timeout { .. } => ErrorKind::Timeout,
            ExecutionError::Provisioning(_)
            | ExecutionError::Launch(_)
            | ExecutionError::Capture { .. } => ErrorKind::Internal,
        }
    }

    /// Text that is safe to return to an untrusted caller.
    pub fn public_message(&self) -> String {
        match self {
            ExecutionError::BadRequest(msg) => msg.clone(),
            ExecutionError::Overloaded { .. } => {
                "Too many executions in progress, try again later.".to_string()
            }
            ExecutionError::Timeout { limit, .. } => {
                format!("Execution timed out after {} seconds.", limit.as_secs())
            }
            _ => "Error executing code.".to_string(),
        }
    }

    /// Output the program produced before the pipeline failed, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            ExecutionError::Capture { partial, .. } | ExecutionError::Timeout { partial, .. }
                if !partial.is_empty() =>
            {
                Some(partial.as_str())
            }
            _ => None,
        }
    }
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to fetch configuration from {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value '{value}' for environment variable {key}")]
    Environment { key: String, value: String },
    #[error("Configuration error: {0}")]
    Invalid(String),
}
