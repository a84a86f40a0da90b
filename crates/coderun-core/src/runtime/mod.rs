//! Container runtime collaborator.
//!
//! The pipeline only ever talks to the runtime through `ContainerRuntime`:
//! create a unit, start it, stream its output, and remove it. `stop_unit` is
//! used solely to kill a unit that overran its deadline.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::errors::RuntimeError;

pub mod docker;

pub use docker::DockerRuntime;

/// A host directory exposed inside the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl BindMount {
    /// Docker `binds` notation: `host:container:mode`.
    pub fn to_bind_string(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host_path, self.container_path, mode)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub pids_limit: Option<i64>,
    pub network_disabled: bool,
}

/// Everything the runtime needs to create one execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub working_dir: String,
    pub mounts: Vec<BindMount>,
    pub limits: ResourceLimits,
}

/// Reference to a created execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxHandle {
    pub id: String,
    pub name: String,
}

/// One demultiplexed piece of unit output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

impl OutputChunk {
    pub fn bytes(&self) -> &[u8] {
        match self {
            OutputChunk::Stdout(b) | OutputChunk::Stderr(b) => b,
        }
    }
}

/// Output in arrival order; ends when the unit's process exits.
pub type OutputStream = BoxStream<'static, Result<OutputChunk, RuntimeError>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_unit(&self, spec: &UnitSpec) -> Result<SandboxHandle, RuntimeError>;

    async fn start_unit(&self, handle: &SandboxHandle) -> Result<(), RuntimeError>;

    async fn stream_output(&self, handle: &SandboxHandle) -> Result<OutputStream, RuntimeError>;

    /// Kill a running unit. Stopping a unit that already exited is not an error.
    async fn stop_unit(&self, handle: &SandboxHandle) -> Result<(), RuntimeError>;

    /// Remove a unit. Removing a unit that no longer exists is not an error.
    async fn remove_unit(&self, handle: &SandboxHandle) -> Result<(), RuntimeError>;
}
