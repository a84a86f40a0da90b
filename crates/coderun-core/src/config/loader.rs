//! Configuration loader for YAML files, URLs and environment overrides

use crate::config::types::*;
use crate::errors::ConfigError;
use std::env;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;

pub const ENV_BIND_ADDR: &str = "CODERUN_BIND_ADDR";
pub const ENV_DOCKER_HOST: &str = "CODERUN_DOCKER_HOST";
pub const ENV_MAX_CONCURRENT: &str = "CODERUN_MAX_CONCURRENT";
pub const ENV_TIMEOUT_SECS: &str = "CODERUN_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "CODERUN_LOG_LEVEL";

/// Configuration loader with environment resolution
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a source (file path or URL)
    pub async fn from_source(source: &str) -> Result<CoderunConfig, ConfigError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            Self::from_url(source).await
        } else {
            Self::from_file(source).await
        }
    }

    /// Load a config file if it exists, otherwise fall back to defaults.
    ///
    /// Environment overrides and validation apply in both cases.
    pub async fn from_file_or_default<P: AsRef<Path>>(path: P) -> Result<CoderunConfig, ConfigError> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            return Self::from_file(path).await;
        }
        log::info!(
            "No configuration file at {}, using built-in defaults",
            path.display()
        );
        let mut config = CoderunConfig::default();
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a URL
    pub async fn from_url(url: &str) -> Result<CoderunConfig, ConfigError> {
        let client = reqwest::Client::new();
        let response = client.get(url).send().await.map_err(|e| ConfigError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(ConfigError::Fetch {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let content = response.text().await.map_err(|e| ConfigError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Self::from_str(&content)
    }

    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<CoderunConfig, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&content)
    }

    /// Parse YAML, apply environment overrides and validate.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<CoderunConfig, ConfigError> {
        let mut config: CoderunConfig = if content.trim().is_empty() {
            CoderunConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CODERUN_*` environment variables on top of file values.
    pub fn apply_env_overrides(config: &mut CoderunConfig) -> Result<(), ConfigError> {
        if let Ok(addr) = env::var(ENV_BIND_ADDR) {
            config.server.bind_addr = addr;
        }
        if let Ok(host) = env::var(ENV_DOCKER_HOST) {
            config.sandbox.docker_host = Some(host);
        }
        if let Some(max) = parse_env::<usize>(ENV_MAX_CONCURRENT)? {
            config.limits.max_concurrent = max;
        }
        if let Some(secs) = parse_env::<u64>(ENV_TIMEOUT_SECS)? {
            config.limits.timeout_secs = secs;
        }
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            config.logging.level = level;
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
