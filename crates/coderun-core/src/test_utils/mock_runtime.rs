// src/test_utils/mock_runtime.rs
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::RuntimeError;
use crate::runtime::{ContainerRuntime, OutputChunk, OutputStream, SandboxHandle, UnitSpec};

/// Failure injection knobs for `MockRuntime`.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub fail_create: bool,
    /// `create_unit` never returns.
    pub hang_create: bool,
    pub fail_start: bool,
    pub fail_remove: bool,
    /// Emit this many chunks, then a stream error.
    pub fail_stream_after: Option<usize>,
    /// Keep the stream open after the program's output instead of ending it.
    pub hang: bool,
    /// Split output into chunks of this many bytes. Zero means one chunk.
    pub chunk_size: usize,
    /// Sleep before the stream is handed out.
    pub stream_delay: Option<Duration>,
}

#[derive(Default)]
struct MockState {
    live: HashMap<String, UnitSpec>,
    created: Vec<UnitSpec>,
    started: Vec<String>,
    stopped: Vec<String>,
    removed: Vec<String>,
    workspace_present_at_removal: Vec<bool>,
    peak_live: usize,
}

/// In-memory container runtime. Its "program" echoes the source file found
/// in the unit's bind mount, so each unit's output identifies its own request.
pub struct MockRuntime {
    behavior: MockBehavior,
    state: Mutex<MockState>,
    next_id: AtomicUsize,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::default())
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            state: Mutex::new(MockState::default()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn created(&self) -> Vec<UnitSpec> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn live_units(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    pub fn peak_live_units(&self) -> usize {
        self.state.lock().unwrap().peak_live
    }

    pub fn workspace_present_at_removal(&self) -> Vec<bool> {
        self.state.lock().unwrap().workspace_present_at_removal.clone()
    }

    fn source_path(spec: &UnitSpec) -> Option<PathBuf> {
        let mount = spec.mounts.first()?;
        let file = spec.command.last()?;
        Some(PathBuf::from(&mount.host_path).join(file))
    }

    fn chunks(&self, program_output: Vec<u8>) -> Vec<Result<OutputChunk, RuntimeError>> {
        let size = if self.behavior.chunk_size == 0 {
            program_output.len().max(1)
        } else {
            self.behavior.chunk_size
        };

        let mut items: Vec<Result<OutputChunk, RuntimeError>> = program_output
            .chunks(size)
            .enumerate()
            .map(|(i, piece)| {
                let bytes = Bytes::copy_from_slice(piece);
                Ok(if i % 2 == 0 {
                    OutputChunk::Stdout(bytes)
                } else {
                    OutputChunk::Stderr(bytes)
                })
            })
            .collect();

        if let Some(n) = self.behavior.fail_stream_after {
            items.truncate(n);
            items.push(Err(RuntimeError::Stream("mock stream reset".to_string())));
        }
        items
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create_unit(&self, spec: &UnitSpec) -> Result<SandboxHandle, RuntimeError> {
        if self.behavior.hang_create {
            std::future::pending::<()>().await;
        }
        if self.behavior.fail_create {
            return Err(RuntimeError::ImageNotFound(spec.image.clone()));
        }
        let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.lock().unwrap();
        state.live.insert(id.clone(), spec.clone());
        state.created.push(spec.clone());
        state.peak_live = state.peak_live.max(state.live.len());
        Ok(SandboxHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn start_unit(&self, handle: &SandboxHandle) -> Result<(), RuntimeError> {
        if self.behavior.fail_start {
            return Err(RuntimeError::Unavailable("mock daemon refused start".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if !state.live.contains_key(&handle.id) {
            return Err(RuntimeError::UnitNotFound(handle.id.clone()));
        }
        state.started.push(handle.id.clone());
        Ok(())
    }

    async fn stream_output(&self, handle: &SandboxHandle) -> Result<OutputStream, RuntimeError> {
        let spec = self
            .state
            .lock()
            .unwrap()
            .live
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnitNotFound(handle.id.clone()))?;

        if let Some(delay) = self.behavior.stream_delay {
            tokio::time::sleep(delay).await;
        }

        let path = Self::source_path(&spec)
            .ok_or_else(|| RuntimeError::Other("unit has no mounted source".to_string()))?;
        let program_output = tokio::fs::read(&path)
            .await
            .map_err(|e| RuntimeError::Other(format!("source missing from mount: {}", e)))?;

        let items = stream::iter(self.chunks(program_output));
        if self.behavior.hang {
            Ok(items.chain(stream::pending()).boxed())
        } else {
            Ok(items.boxed())
        }
    }

    async fn stop_unit(&self, handle: &SandboxHandle) -> Result<(), RuntimeError> {
        self.state.lock().unwrap().stopped.push(handle.id.clone());
        Ok(())
    }

    async fn remove_unit(&self, handle: &SandboxHandle) -> Result<(), RuntimeError> {
        if self.behavior.fail_remove {
            return Err(RuntimeError::Other("mock removal failure".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        if let Some(spec) = state.live.remove(&handle.id) {
            let present = spec
                .mounts
                .first()
                .map(|m| std::path::Path::new(&m.host_path).exists())
                .unwrap_or(false);
            state.workspace_present_at_removal.push(present);
            state.removed.push(handle.id.clone());
        }
        Ok(())
    }
}
