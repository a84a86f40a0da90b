//! Configuration module for the execution service
//!
//! Supports YAML configuration files (local or fetched over HTTP) with
//! `CODERUN_*` environment overrides layered on top.

pub mod types;
pub mod loader;

pub use types::*;
pub use loader::*;


use crate::errors::ConfigError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<CoderunConfig, ConfigError> {
    ConfigLoader::from_file(path).await
}
