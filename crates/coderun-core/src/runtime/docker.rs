// src/runtime/docker.rs
use async_trait::async_trait;
use bollard::container::LogOutput; // For LogOutput::StdOut, LogOutput::StdErr
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions as BollardCreateContainerOptionsQuery,
    CreateImageOptions as BollardCreateImageOptionsQuery,
    KillContainerOptions as BollardKillContainerOptionsQuery,
    LogsOptions as BollardLogsOptionsQuery,
    RemoveContainerOptions as BollardRemoveContainerOptionsQuery,
    StartContainerOptions as BollardStartContainerOptionsQuery,
};
use bollard::Docker;
use futures_util::stream::StreamExt;

use super::{ContainerRuntime, OutputChunk, OutputStream, SandboxHandle, UnitSpec};
use crate::config::SandboxConfig;
use crate::errors::RuntimeError;

const DOCKER_CONNECT_TIMEOUT_SECS: u64 = 120;

/// `ContainerRuntime` backed by a Docker daemon through bollard.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    pull_missing_images: bool,
}

impl DockerRuntime {
    pub fn connect(config: &SandboxConfig) -> Result<Self, RuntimeError> {
        let docker = match config.docker_host.as_deref() {
            Some(socket) => Docker::connect_with_socket(
                socket,
                DOCKER_CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| RuntimeError::Unavailable(format!("Failed to connect to Docker: {}", e)))?;

        Ok(Self {
            docker,
            pull_missing_images: config.pull_missing_images,
        })
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if status_code(&e) == Some(404) => {}
            Err(e) => return Err(e.into()),
        }

        log::info!("Image {} not present locally, pulling", image);
        let pull_options = Some(BollardCreateImageOptionsQuery {
            from_image: Some(image.to_string()),
            ..Default::default()
        });
        let mut pull_stream = self.docker.create_image(pull_options, None, None);
        while let Some(result) = pull_stream.next().await {
            if let Err(e) = result {
                log::warn!("Failed to pull image {}: {}", image, e);
                return Err(RuntimeError::ImageNotFound(image.to_string()));
            }
        }
        Ok(())
    }

    fn container_body(spec: &UnitSpec) -> ContainerCreateBody {
        let limits = &spec.limits;
        let host_config = HostConfig {
            binds: Some(spec.mounts.iter().map(|m| m.to_bind_string()).collect()),
            memory: limits.memory_bytes,
            // Equal to `memory` so the unit cannot spill into swap.
            memory_swap: limits.memory_bytes,
            nano_cpus: limits.nano_cpus,
            pids_limit: limits.pids_limit,
            network_mode: limits.network_disabled.then(|| "none".to_string()),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..Default::default()
        };

        ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            host_config: Some(host_config),
            network_disabled: Some(limits.network_disabled),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            // No TTY: the log stream stays demultiplexed into stdout/stderr frames.
            tty: Some(false),
            ..Default::default()
        }
    }
}

fn status_code(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_unit(&self, spec: &UnitSpec) -> Result<SandboxHandle, RuntimeError> {
        if self.pull_missing_images {
            self.ensure_image(&spec.image).await?;
        }

        let options = Some(BollardCreateContainerOptionsQuery {
            name: Some(spec.name.clone()),
            ..Default::default()
        });

        let container = self
            .docker
            .create_container(options, Self::container_body(spec))
            .await
            .map_err(|e| match status_code(&e) {
                Some(404) => RuntimeError::ImageNotFound(spec.image.clone()),
                _ => RuntimeError::Docker(e),
            })?;

        for warning in &container.warnings {
            log::warn!("Docker warning for {}: {}", spec.name, warning);
        }

        Ok(SandboxHandle {
            id: container.id,
            name: spec.name.clone(),
        })
    }

    async fn start_unit(&self, handle: &SandboxHandle) -> Result<(), RuntimeError> {
        self.docker
            .start_container(&handle.id, None::<BollardStartContainerOptionsQuery>)
            .await?;
        Ok(())
    }

    async fn stream_output(&self, handle: &SandboxHandle) -> Result<OutputStream, RuntimeError> {
        let stream = self
            .docker
            .logs(
                &handle.id,
                Some(BollardLogsOptionsQuery {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            )
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(OutputChunk::Stdout(message)))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk::Stderr(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(RuntimeError::Docker(e))),
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn stop_unit(&self, handle: &SandboxHandle) -> Result<(), RuntimeError> {
        match self
            .docker
            .kill_container(&handle.id, None::<BollardKillContainerOptionsQuery>)
            .await
        {
            Ok(()) => Ok(()),
            // 404: already gone, 409: not running any more
            Err(e) if matches!(status_code(&e), Some(404) | Some(409)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_unit(&self, handle: &SandboxHandle) -> Result<(), RuntimeError> {
        let options = Some(BollardRemoveContainerOptionsQuery {
            force: true,
            v: true,
            ..Default::default()
        });
        match self.docker.remove_container(&handle.id, options).await {
            Ok(()) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => {
                log::debug!("Unit {} was already removed", handle.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
