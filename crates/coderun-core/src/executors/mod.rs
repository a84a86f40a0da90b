//! Code execution entry points.
//!
//! `CodeExecutor` is the seam between the request boundary and the sandboxed
//! pipeline. `ExecutionOrchestrator` is the production implementation; the
//! HTTP layer only depends on the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ExecutionError;
use crate::registry::LanguageInfo;

/// One request to run a snippet. Missing fields deserialize as empty strings
/// so that they are reported by validation instead of by the JSON decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub code: String,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Combined stdout and stderr, verbatim.
    pub output: String,
    /// Output stopped at the configured byte limit.
    pub truncated: bool,
}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError>;

    /// Languages this executor accepts.
    fn languages(&self) -> Vec<LanguageInfo>;
}

pub mod orchestrator;

pub use orchestrator::ExecutionOrchestrator;
