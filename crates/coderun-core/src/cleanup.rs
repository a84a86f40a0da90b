//! Scoped release of per-request resources.
//!
//! A `ResourceScope` is filled in as the pipeline acquires things (first the
//! workspace, then the execution unit) and released once at the end of the
//! request, in reverse order. Release never fails: removal errors are logged
//! and collected in the returned `CleanupReport`. A scope dropped without
//! release removes its workspace on the spot and hands the unit to a
//! background task.

use std::sync::Arc;

use crate::runtime::{ContainerRuntime, SandboxHandle};
use crate::workspace::{destroy_path, Workspace};

/// What happened during release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// A unit was tracked and is now gone.
    pub unit_removed: bool,
    /// A workspace was tracked and is now gone.
    pub workspace_removed: bool,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct ResourceScope {
    runtime: Arc<dyn ContainerRuntime>,
    label: String,
    workspace: Option<Workspace>,
    unit: Option<SandboxHandle>,
}

impl ResourceScope {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, label: impl Into<String>) -> Self {
        Self {
            runtime,
            label: label.into(),
            workspace: None,
            unit: None,
        }
    }

    pub fn track_workspace(&mut self, workspace: Workspace) {
        self.workspace = Some(workspace);
    }

    pub fn track_unit(&mut self, handle: SandboxHandle) {
        self.unit = Some(handle);
    }

    pub fn unit(&self) -> Option<&SandboxHandle> {
        self.unit.as_ref()
    }

    /// Remove the unit, then the workspace. Consumes the scope so release
    /// happens at most once.
    pub async fn release(mut self) -> CleanupReport {
        let unit = self.unit.take();
        let workspace = self.workspace.take();
        release_resources(self.runtime.as_ref(), &self.label, unit, workspace).await
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        if self.unit.is_none() && self.workspace.is_none() {
            return;
        }
        let unit = self.unit.take();
        let workspace = self.workspace.take();
        let label = std::mem::take(&mut self.label);
        log::warn!("[{}] Resources dropped without release", label);

        // A task spawned from here is never polled once the runtime is
        // shutting down, so the workspace cannot wait for it.
        if let Some(workspace) = workspace {
            if let Err(e) = std::fs::remove_dir_all(workspace.root()) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::error!("[{}] Failed to remove workspace {}: {}", label, workspace.root().display(), e);
                }
            }
        }

        let Some(unit) = unit else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runtime = self.runtime.clone();
                handle.spawn(async move {
                    release_resources(runtime.as_ref(), &label, Some(unit), None).await;
                });
            }
            Err(_) => {
                log::error!("[{}] No async runtime available, unit {} was not removed", label, unit.name);
            }
        }
    }
}

async fn release_resources(
    runtime: &dyn ContainerRuntime,
    label: &str,
    unit: Option<SandboxHandle>,
    workspace: Option<Workspace>,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    if let Some(unit) = unit {
        match runtime.remove_unit(&unit).await {
            Ok(()) => {
                log::debug!("[{}] Removed unit {}", label, unit.name);
                report.unit_removed = true;
            }
            Err(e) if e.is_unit_not_found() => report.unit_removed = true,
            Err(e) => {
                log::error!("[{}] Failed to remove unit {} ({}): {}", label, unit.name, unit.id, e);
                report.failures.push(format!("unit {}: {}", unit.name, e));
            }
        }
    }

    if let Some(workspace) = workspace {
        match destroy_path(workspace.root()).await {
            Ok(()) => {
                log::debug!("[{}] Removed workspace {}", label, workspace.root().display());
                report.workspace_removed = true;
            }
            Err(e) => {
                log::error!("[{}] Failed to remove workspace {}: {}", label, workspace.root().display(), e);
                report.failures.push(format!("workspace {}: {}", workspace.root().display(), e));
            }
        }
    }

    report
}
