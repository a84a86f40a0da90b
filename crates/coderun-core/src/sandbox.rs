//! Sandbox launcher: turns a language profile and a workspace into a running
//! execution unit that can see nothing of the host but that workspace.

use std::sync::Arc;
use uuid::Uuid;

use crate::cleanup::ResourceScope;
use crate::config::{LimitsConfig, SandboxConfig};
use crate::errors::RuntimeError;
use crate::registry::LanguageProfile;
use crate::runtime::{BindMount, ContainerRuntime, ResourceLimits, SandboxHandle, UnitSpec};
use crate::workspace::Workspace;

#[derive(Clone)]
pub struct SandboxLauncher {
    runtime: Arc<dyn ContainerRuntime>,
    working_dir: String,
    name_prefix: String,
    limits: ResourceLimits,
}

impl SandboxLauncher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, sandbox: &SandboxConfig, limits: &LimitsConfig) -> Self {
        Self {
            runtime,
            working_dir: sandbox.working_dir.clone(),
            name_prefix: sandbox.unit_name_prefix.clone(),
            limits: ResourceLimits {
                memory_bytes: Some(limits.memory_bytes).filter(|v| *v > 0),
                nano_cpus: Some(limits.nano_cpus).filter(|v| *v > 0),
                pids_limit: Some(limits.pids_limit).filter(|v| *v > 0),
                network_disabled: limits.network_disabled,
            },
        }
    }

    /// Build the unit specification: the profile's image and command, and a
    /// single read-write bind of the workspace onto the working directory.
    pub fn unit_spec(&self, profile: &LanguageProfile, workspace: &Workspace) -> Result<UnitSpec, RuntimeError> {
        let host_path = workspace
            .root()
            .to_str()
            .ok_or_else(|| RuntimeError::Other("Workspace path is not valid UTF-8".to_string()))?
            .to_string();

        Ok(UnitSpec {
            name: format!("{}{}", self.name_prefix, Uuid::new_v4()),
            image: profile.image.clone(),
            command: profile.command_for(workspace.file_name()),
            working_dir: self.working_dir.clone(),
            mounts: vec![BindMount {
                host_path,
                container_path: self.working_dir.clone(),
                read_only: false,
            }],
            limits: self.limits.clone(),
        })
    }

    /// Create and start a unit for `workspace`.
    ///
    /// The handle is recorded in `scope` as soon as the unit exists, so a
    /// failed start still leaves the unit to be removed by cleanup.
    pub async fn launch(
        &self,
        profile: &LanguageProfile,
        workspace: &Workspace,
        scope: &mut ResourceScope,
    ) -> Result<SandboxHandle, RuntimeError> {
        let spec = self.unit_spec(profile, workspace)?;
        log::debug!("Creating unit {} from image {}", spec.name, spec.image);

        let handle = self.runtime.create_unit(&spec).await?;
        scope.track_unit(handle.clone());

        self.runtime.start_unit(&handle).await?;
        log::debug!("Started unit {} ({})", handle.name, handle.id);
        Ok(handle)
    }
}
