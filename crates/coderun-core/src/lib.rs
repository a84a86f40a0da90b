//! Sandboxed execution of untrusted code snippets.
//!
//! A request names a language and carries source code. The crate writes the
//! code into a private workspace directory, runs it inside a disposable
//! container with that directory bind-mounted, captures the combined output,
//! and removes both the container and the workspace before answering.
//!
//! # Architecture Overview
//!
//! - **Language registry**: maps a language key to an image, a file extension and a command template
//! - **Workspace provisioning**: one uniquely named directory per request
//! - **Container runtime**: a trait seam over the Docker Engine API (`bollard`)
//! - **Output capture**: bounded, order-preserving stdout/stderr collection
//! - **Cleanup**: scoped ownership of every acquired resource
//! - **Admission**: a semaphore bounding concurrently live executions
//! - **Configuration system**: YAML files with environment overrides

pub mod admission;
pub mod capture;
pub mod cleanup;
pub mod config;
pub mod errors;
pub mod executors;
pub mod registry;
pub mod runtime;
pub mod sandbox;
pub mod workspace;

pub use admission::AdmissionGate;
pub use config::*;
pub use errors::{ConfigError, ErrorKind, ExecutionError, RuntimeError};
pub use executors::{CodeExecutor, ExecutionOrchestrator, ExecutionRequest, ExecutionResult};
pub use registry::{LanguageInfo, LanguageProfile, LanguageRegistry};
pub use runtime::{ContainerRuntime, DockerRuntime};

#[cfg(test)]
pub mod test_utils;
