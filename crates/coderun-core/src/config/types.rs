//! Configuration type definitions for the execution service
//!
//! Every section is optional in the YAML file and falls back to defaults that
//! match a single-host deployment: a local Docker daemon, workspaces under the
//! system temp directory, and the built-in language table.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::errors::ConfigError;
use crate::registry::FILE_PLACEHOLDER;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoderunConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Replaces the built-in language table when present.
    #[serde(default)]
    pub languages: Option<HashMap<String, LanguageConfig>>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings consumed by the server crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Allowed CORS origins; `None` allows any origin.
    #[serde(default)]
    pub cors_origins: Option<Vec<String>>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_true")]
    pub request_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Unix socket of the Docker daemon. Local defaults are used when unset.
    #[serde(default)]
    pub docker_host: Option<String>,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default)]
    pub pull_missing_images: bool,
    #[serde(default = "default_name_prefix")]
    pub unit_name_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    #[serde(default = "default_name_prefix")]
    pub dir_prefix: String,
    #[serde(default = "default_source_file_stem")]
    pub source_file_stem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// How long a request may wait for a free slot. Zero rejects immediately.
    #[serde(default)]
    pub queue_timeout_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: i64,
    #[serde(default = "default_nano_cpus")]
    pub nano_cpus: i64,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    #[serde(default = "default_true")]
    pub network_disabled: bool,
    #[serde(default = "default_true")]
    pub return_partial_output: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub image: String,
    pub extension: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind_addr() -> String { "127.0.0.1:3001".to_string() }
fn default_max_body_bytes() -> usize { 1024 * 1024 }
fn default_true() -> bool { true }
fn default_working_dir() -> String { "/app".to_string() }
fn default_name_prefix() -> String { "coderun-".to_string() }
fn default_source_file_stem() -> String { "code".to_string() }
fn default_max_concurrent() -> usize { 8 }
fn default_timeout_secs() -> u64 { 10 }
fn default_max_output_bytes() -> usize { 1024 * 1024 }
fn default_max_code_bytes() -> usize { 256 * 1024 }
fn default_memory_bytes() -> i64 { 256 * 1024 * 1024 }
fn default_nano_cpus() -> i64 { 1_000_000_000 }
fn default_pids_limit() -> i64 { 128 }
fn default_log_level() -> String { "info".to_string() }

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors_origins: None,
            max_body_bytes: default_max_body_bytes(),
            request_logging: true,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            working_dir: default_working_dir(),
            pull_missing_images: false,
            unit_name_prefix: default_name_prefix(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            dir_prefix: default_name_prefix(),
            source_file_stem: default_source_file_stem(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_timeout_ms: 0,
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            max_code_bytes: default_max_code_bytes(),
            memory_bytes: default_memory_bytes(),
            nano_cpus: default_nano_cpus(),
            pids_limit: default_pids_limit(),
            network_disabled: true,
            return_partial_output: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WorkspaceConfig {
    /// Directory under which per-request workspaces are created.
    pub fn resolved_base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn is_plain_name(s: &str) -> bool {
    !s.is_empty() && !s.contains(['/', '\\', '.']) && !s.chars().any(char::is_whitespace)
}

impl CoderunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_concurrent == 0 {
            return Err(ConfigError::Invalid("limits.max_concurrent must be greater than 0".to_string()));
        }
        if self.limits.timeout_secs == 0 {
            return Err(ConfigError::Invalid("limits.timeout_secs must be greater than 0".to_string()));
        }
        if self.limits.max_output_bytes == 0 {
            return Err(ConfigError::Invalid("limits.max_output_bytes must be greater than 0".to_string()));
        }
        if self.limits.max_code_bytes == 0 {
            return Err(ConfigError::Invalid("limits.max_code_bytes must be greater than 0".to_string()));
        }
        if !self.sandbox.working_dir.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "sandbox.working_dir must be an absolute path, got '{}'",
                self.sandbox.working_dir
            )));
        }
        if !is_plain_name(&self.workspace.source_file_stem) {
            return Err(ConfigError::Invalid(format!(
                "workspace.source_file_stem '{}' must be a plain file name",
                self.workspace.source_file_stem
            )));
        }
        for (key, prefix) in [
            ("workspace.dir_prefix", &self.workspace.dir_prefix),
            ("sandbox.unit_name_prefix", &self.sandbox.unit_name_prefix),
        ] {
            if !is_plain_name(prefix) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' must not contain dots, separators or whitespace",
                    key, prefix
                )));
            }
        }

        if let Some(languages) = &self.languages {
            if languages.is_empty() {
                return Err(ConfigError::Invalid("languages must define at least one language".to_string()));
            }
            let mut keys: HashSet<&str> = languages.keys().map(String::as_str).collect();
            for (name, language) in languages {
                self.validate_language(name, language)?;
                for alias in &language.aliases {
                    if !keys.insert(alias.as_str()) {
                        return Err(ConfigError::Invalid(format!(
                            "Language alias '{}' of '{}' collides with another language or alias",
                            alias, name
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_language(&self, name: &str, language: &LanguageConfig) -> Result<(), ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::Invalid("Language name cannot be empty".to_string()));
        }
        if language.image.is_empty() {
            return Err(ConfigError::Invalid(format!("Language '{}' image cannot be empty", name)));
        }
        if !is_plain_name(&language.extension) {
            return Err(ConfigError::Invalid(format!(
                "Language '{}' extension '{}' must be a bare extension without dots or separators",
                name, language.extension
            )));
        }
        if language.command.is_empty() {
            return Err(ConfigError::Invalid(format!("Language '{}' command cannot be empty", name)));
        }
        if !language.command.iter().any(|arg| arg.contains(FILE_PLACEHOLDER)) {
            return Err(ConfigError::Invalid(format!(
                "Language '{}' command must reference the source file with {}",
                name, FILE_PLACEHOLDER
            )));
        }
        Ok(())
    }
}
