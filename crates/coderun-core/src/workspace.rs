//! Per-request workspace directories.
//!
//! Each request gets its own directory holding exactly one source file. The
//! directory is the only host path a sandbox can see, and it is removed at the
//! end of the request whatever the outcome.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::WorkspaceConfig;
use crate::registry::LanguageProfile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    source_file: PathBuf,
    file_name: String,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Name of the source file relative to the workspace root.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceProvisioner {
    base_dir: PathBuf,
    dir_prefix: String,
    source_file_stem: String,
}

impl WorkspaceProvisioner {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            dir_prefix: "coderun-".to_string(),
            source_file_stem: "code".to_string(),
        }
    }

    pub fn from_config(config: &WorkspaceConfig) -> Self {
        Self {
            base_dir: config.resolved_base_dir(),
            dir_prefix: config.dir_prefix.clone(),
            source_file_stem: config.source_file_stem.clone(),
        }
    }

    /// Create a fresh directory and write `code` into it verbatim.
    ///
    /// `create_dir` fails if the path already exists, so two concurrent calls
    /// can never share a directory. A failed write removes the directory
    /// before the error is returned.
    pub async fn provision(&self, code: &str, profile: &LanguageProfile) -> io::Result<Workspace> {
        let root = self
            .base_dir
            .join(format!("{}{}", self.dir_prefix, Uuid::new_v4()));
        fs::create_dir(&root).await?;

        let file_name = format!("{}.{}", self.source_file_stem, profile.file_extension);
        let source_file = root.join(&file_name);

        if let Err(e) = write_source(&source_file, code).await {
            if let Err(cleanup_err) = destroy_path(&root).await {
                log::error!(
                    "Failed to remove workspace {} after write error: {}",
                    root.display(),
                    cleanup_err
                );
            }
            return Err(e);
        }

        log::debug!("Provisioned workspace {}", root.display());
        Ok(Workspace {
            root,
            source_file,
            file_name,
        })
    }

    pub async fn destroy(&self, workspace: &Workspace) -> io::Result<()> {
        destroy_path(workspace.root()).await
    }
}

async fn write_source(path: &Path, code: &str) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(code.as_bytes()).await?;
    file.flush().await
}

/// Recursively remove `path`. A path that does not exist counts as removed.
pub async fn destroy_path(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
