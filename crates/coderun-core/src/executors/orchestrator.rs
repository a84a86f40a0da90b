//! Request-scoped coordinator of the sandboxed execution pipeline.
//!
//! One call to `run` walks a request through
//! `Validating → Provisioning → Launching → Capturing → CleaningUp → Done`.
//! Anything acquired after validation is tracked in a `ResourceScope` and
//! released on every exit path before `run` returns.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{CodeExecutor, ExecutionRequest, ExecutionResult};
use crate::admission::AdmissionGate;
use crate::capture::{capture_into, CaptureSink};
use crate::cleanup::ResourceScope;
use crate::config::CoderunConfig;
use crate::errors::{ExecutionError, RuntimeError};
use crate::registry::{LanguageInfo, LanguageProfile, LanguageRegistry};
use crate::runtime::ContainerRuntime;
use crate::sandbox::SandboxLauncher;
use crate::workspace::{Workspace, WorkspaceProvisioner};

const MAX_ECHOED_LANGUAGE_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Validating,
    Provisioning,
    Launching,
    Capturing,
    CleaningUp,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Validating => "validating",
            PipelineStage::Provisioning => "provisioning",
            PipelineStage::Launching => "launching",
            PipelineStage::Capturing => "capturing",
            PipelineStage::CleaningUp => "cleaning up",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

pub struct ExecutionOrchestrator {
    registry: Arc<LanguageRegistry>,
    provisioner: WorkspaceProvisioner,
    launcher: SandboxLauncher,
    runtime: Arc<dyn ContainerRuntime>,
    gate: AdmissionGate,
    timeout: Duration,
    max_output_bytes: usize,
    max_code_bytes: usize,
    return_partial_output: bool,
}

impl ExecutionOrchestrator {
    pub fn new(
        config: &CoderunConfig,
        registry: Arc<LanguageRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            registry,
            provisioner: WorkspaceProvisioner::from_config(&config.workspace),
            launcher: SandboxLauncher::new(runtime.clone(), &config.sandbox, &config.limits),
            runtime,
            gate: AdmissionGate::from_config(&config.limits),
            timeout: Duration::from_secs(config.limits.timeout_secs),
            max_output_bytes: config.limits.max_output_bytes,
            max_code_bytes: config.limits.max_code_bytes,
            return_partial_output: config.limits.return_partial_output,
        }
    }

    /// Build the registry from the config's `languages` section.
    pub fn from_config(config: &CoderunConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let registry = Arc::new(LanguageRegistry::from_config(config.languages.as_ref()));
        Self::new(config, registry, runtime)
    }

    /// Override the per-execution deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one request through the whole pipeline.
    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        stage(&request_id, PipelineStage::Validating);
        let profile = match self.validate(request) {
            Ok(profile) => profile,
            Err(e) => {
                log::info!("[{}] Rejected request: {}", request_id, e);
                return Err(e);
            }
        };

        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                log::warn!("[{}] {}", request_id, e);
                return Err(e);
            }
        };

        stage(&request_id, PipelineStage::Provisioning);
        let workspace = match self.provisioner.provision(&request.code, profile).await {
            Ok(workspace) => workspace,
            Err(e) => {
                log::error!("[{}] Failed to provision workspace: {}", request_id, e);
                return Err(ExecutionError::Provisioning(e));
            }
        };

        let mut scope = ResourceScope::new(self.runtime.clone(), request_id.clone());
        scope.track_workspace(workspace.clone());

        let outcome = self
            .launch_and_capture(&request_id, profile, &workspace, &mut scope)
            .await;

        stage(&request_id, PipelineStage::CleaningUp);
        let report = scope.release().await;
        if !report.is_clean() {
            log::warn!(
                "[{}] Cleanup finished with {} failure(s)",
                request_id,
                report.failures.len()
            );
        }

        match &outcome {
            Ok(result) => {
                stage(&request_id, PipelineStage::Done);
                log::info!(
                    "[{}] {} execution finished in {:?} ({} bytes of output{})",
                    request_id,
                    request.language,
                    started.elapsed(),
                    result.output.len(),
                    if result.truncated { ", truncated" } else { "" }
                );
            }
            Err(e) => log::warn!(
                "[{}] {} execution failed after {:?}: {}",
                request_id,
                request.language,
                started.elapsed(),
                e
            ),
        }
        outcome
    }

    fn validate(&self, request: &ExecutionRequest) -> Result<&LanguageProfile, ExecutionError> {
        if request.code.is_empty() {
            return Err(ExecutionError::bad_request("Code is required."));
        }
        if request.code.len() > self.max_code_bytes {
            return Err(ExecutionError::bad_request(format!(
                "Code exceeds the maximum size of {} bytes.",
                self.max_code_bytes
            )));
        }
        self.registry.lookup(&request.language).ok_or_else(|| {
            let shown: String = request
                .language
                .chars()
                .filter(|c| !c.is_control())
                .take(MAX_ECHOED_LANGUAGE_CHARS)
                .collect();
            ExecutionError::bad_request(format!("Unsupported language: {}.", shown))
        })
    }

    /// Launch and capture share one deadline, so a slow image pull or a stuck
    /// create/start is bounded the same way a runaway program is.
    async fn launch_and_capture(
        &self,
        request_id: &str,
        profile: &LanguageProfile,
        workspace: &Workspace,
        scope: &mut ResourceScope,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut sink = CaptureSink::new(Some(self.max_output_bytes));
        let staged = tokio::time::timeout(
            self.timeout,
            self.launch_then_capture(request_id, profile, workspace, scope, &mut sink),
        )
        .await;

        match staged {
            Ok(Ok(())) => {
                let output = sink.finish();
                Ok(ExecutionResult {
                    output: output.output,
                    truncated: output.truncated,
                })
            }
            Ok(Err(StageFailure::Launch(e))) => {
                log::error!("[{}] Failed to launch {}: {}", request_id, profile.image, e);
                Err(ExecutionError::Launch(e))
            }
            Ok(Err(StageFailure::Capture(e))) => {
                log::error!("[{}] Output stream failed: {}", request_id, e);
                Err(ExecutionError::Capture {
                    source: e,
                    partial: self.partial(&sink),
                })
            }
            Err(_elapsed) => {
                match scope.unit() {
                    Some(handle) => {
                        log::warn!(
                            "[{}] Unit {} exceeded the {:?} deadline, stopping it",
                            request_id,
                            handle.name,
                            self.timeout
                        );
                        if let Err(e) = self.runtime.stop_unit(handle).await {
                            log::warn!("[{}] Failed to stop unit {}: {}", request_id, handle.name, e);
                        }
                    }
                    None => log::warn!(
                        "[{}] Launch of {} did not finish within the {:?} deadline",
                        request_id,
                        profile.image,
                        self.timeout
                    ),
                }
                Err(ExecutionError::Timeout {
                    limit: self.timeout,
                    partial: self.partial(&sink),
                })
            }
        }
    }

    async fn launch_then_capture(
        &self,
        request_id: &str,
        profile: &LanguageProfile,
        workspace: &Workspace,
        scope: &mut ResourceScope,
        sink: &mut CaptureSink,
    ) -> Result<(), StageFailure> {
        stage(request_id, PipelineStage::Launching);
        let handle = self
            .launcher
            .launch(profile, workspace, scope)
            .await
            .map_err(StageFailure::Launch)?;

        stage(request_id, PipelineStage::Capturing);
        capture_into(self.runtime.as_ref(), &handle, sink)
            .await
            .map_err(StageFailure::Capture)
    }

    fn partial(&self, sink: &CaptureSink) -> String {
        if self.return_partial_output {
            sink.text()
        } else {
            String::new()
        }
    }
}

enum StageFailure {
    Launch(RuntimeError),
    Capture(RuntimeError),
}

fn stage(request_id: &str, stage: PipelineStage) {
    log::debug!("[{}] {}", request_id, stage);
}

#[async_trait]
impl CodeExecutor for ExecutionOrchestrator {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        self.run(&request).await
    }

    fn languages(&self) -> Vec<LanguageInfo> {
        self.registry.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::test_utils::{MockBehavior, MockRuntime};
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        base: TempDir,
        runtime: Arc<MockRuntime>,
        orchestrator: Arc<ExecutionOrchestrator>,
    }

    impl Fixture {
        fn new(behavior: MockBehavior) -> Self {
            Self::with_config(behavior, |_| {})
        }

        fn with_config(behavior: MockBehavior, tweak: impl FnOnce(&mut CoderunConfig)) -> Self {
            let base = tempdir().unwrap();
            let mut config = CoderunConfig::default();
            config.workspace.base_dir = Some(base.path().to_path_buf());
            tweak(&mut config);

            let runtime = Arc::new(MockRuntime::with_behavior(behavior));
            let orchestrator = Arc::new(ExecutionOrchestrator::from_config(&config, runtime.clone()));
            Self {
                base,
                runtime,
                orchestrator,
            }
        }

        fn with_timeout(mut self, timeout: Duration) -> Self {
            let orchestrator = Arc::try_unwrap(self.orchestrator)
                .ok()
                .expect("fixture orchestrator is not shared yet");
            self.orchestrator = Arc::new(orchestrator.with_timeout(timeout));
            self
        }

        fn workspaces_left(&self) -> usize {
            count_entries(self.base.path())
        }
    }

    fn count_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn runs_and_cleans_up() {
        let fx = Fixture::new(MockBehavior::default());

        let result = fx
            .orchestrator
            .run(&ExecutionRequest::new("javascript", "console.log('hi')"))
            .await
            .unwrap();

        assert_eq!(result.output, "console.log('hi')");
        assert!(!result.truncated);
        assert_eq!(fx.workspaces_left(), 0);
        assert_eq!(fx.runtime.live_units(), 0);

        let created = fx.runtime.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].image, "node:18-slim");
        assert_eq!(created[0].command, vec!["node", "code.js"]);
        assert_eq!(fx.runtime.started().len(), 1);
        assert_eq!(fx.runtime.workspace_present_at_removal(), vec![true]);
    }

    #[tokio::test]
    async fn unknown_language_acquires_nothing() {
        let fx = Fixture::new(MockBehavior::default());

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new("ruby", "puts 1"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.public_message(), "Unsupported language: ruby.");
        assert_eq!(fx.workspaces_left(), 0);
        assert!(fx.runtime.created().is_empty());
    }

    #[tokio::test]
    async fn empty_code_is_rejected_before_any_side_effect() {
        let fx = Fixture::new(MockBehavior::default());

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new("python", ""))
            .await
            .unwrap_err();

        assert_eq!(err.public_message(), "Code is required.");
        assert_eq!(fx.workspaces_left(), 0);
        assert!(fx.runtime.created().is_empty());
        assert_eq!(fx.orchestrator.admission().available(), 8);
    }

    #[tokio::test]
    async fn oversized_code_is_rejected() {
        let fx = Fixture::with_config(MockBehavior::default(), |c| c.limits.max_code_bytes = 8);

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new("python", "print('far too long')"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(fx.runtime.created().is_empty());
    }

    #[tokio::test]
    async fn echoed_language_is_sanitized() {
        let fx = Fixture::new(MockBehavior::default());
        let language = format!("x\n{}", "y".repeat(200));

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new(language, "1"))
            .await
            .unwrap_err();

        let message = err.public_message();
        assert!(!message.contains('\n'));
        assert!(message.len() < 100);
    }

    #[tokio::test]
    async fn create_failure_removes_workspace() {
        let fx = Fixture::new(MockBehavior {
            fail_create: true,
            ..Default::default()
        });

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new("python", "print(1+1)"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Launch(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.public_message(), "Error executing code.");
        assert_eq!(fx.workspaces_left(), 0);
        assert_eq!(fx.runtime.live_units(), 0);
    }

    #[tokio::test]
    async fn start_failure_removes_unit_and_workspace() {
        let fx = Fixture::new(MockBehavior {
            fail_start: true,
            ..Default::default()
        });

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new("python", "print(1+1)"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Launch(_)));
        assert_eq!(fx.runtime.created().len(), 1);
        assert_eq!(fx.runtime.removed().len(), 1);
        assert_eq!(fx.runtime.live_units(), 0);
        assert_eq!(fx.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn stream_failure_keeps_partial_output_and_cleans_up() {
        let fx = Fixture::new(MockBehavior {
            fail_stream_after: Some(1),
            chunk_size: 6,
            ..Default::default()
        });

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new("python", "print('hello')"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Capture { .. }));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.partial_output(), Some("print("));
        assert_eq!(fx.runtime.live_units(), 0);
        assert_eq!(fx.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn partial_output_can_be_suppressed() {
        let fx = Fixture::with_config(
            MockBehavior {
                fail_stream_after: Some(1),
                chunk_size: 2,
                ..Default::default()
            },
            |c| c.limits.return_partial_output = false,
        );

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new("python", "print(1)"))
            .await
            .unwrap_err();

        assert_eq!(err.partial_output(), None);
    }

    #[tokio::test]
    async fn deadline_stops_the_unit() {
        let fx = Fixture::new(MockBehavior {
            hang: true,
            ..Default::default()
        })
        .with_timeout(Duration::from_millis(50));

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new("python", "while True: pass"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Timeout { .. }));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.partial_output(), Some("while True: pass"));
        assert_eq!(fx.runtime.stopped().len(), 1);
        assert_eq!(fx.runtime.live_units(), 0);
        assert_eq!(fx.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn deadline_covers_a_launch_that_never_finishes() {
        let fx = Fixture::new(MockBehavior {
            hang_create: true,
            ..Default::default()
        })
        .with_timeout(Duration::from_millis(50));
        assert_eq!(fx.orchestrator.timeout(), Duration::from_millis(50));

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            fx.orchestrator.run(&ExecutionRequest::new("python", "print(1)")),
        )
        .await
        .expect("run must return once the deadline passes")
        .unwrap_err();

        assert!(matches!(err, ExecutionError::Timeout { .. }));
        assert_eq!(err.partial_output(), None);
        assert!(fx.runtime.created().is_empty());
        assert_eq!(fx.workspaces_left(), 0);
        assert_eq!(fx.orchestrator.admission().available(), 8);
    }

    #[tokio::test]
    async fn output_is_capped() {
        let fx = Fixture::with_config(MockBehavior::default(), |c| c.limits.max_output_bytes = 5);

        let result = fx
            .orchestrator
            .run(&ExecutionRequest::new("python", "print('abcdefgh')"))
            .await
            .unwrap();

        assert_eq!(result.output, "print");
        assert!(result.truncated);
        assert_eq!(fx.runtime.live_units(), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_never_see_each_others_output() {
        let fx = Fixture::with_config(
            MockBehavior {
                chunk_size: 3,
                stream_delay: Some(Duration::from_millis(5)),
                ..Default::default()
            },
            |c| {
                c.limits.max_concurrent = 4;
                c.limits.queue_timeout_ms = 10_000;
            },
        );

        let tasks: Vec<_> = (0..24)
            .map(|i| {
                let orchestrator = fx.orchestrator.clone();
                tokio::spawn(async move {
                    let code = format!("print({})  # request {}", i * 7, i);
                    let result = orchestrator
                        .run(&ExecutionRequest::new("python", code.clone()))
                        .await
                        .unwrap();
                    (code, result.output)
                })
            })
            .collect();

        for task in tasks {
            let (code, output) = task.await.unwrap();
            assert_eq!(output, code);
        }
        assert!(fx.runtime.peak_live_units() <= 4);
        assert_eq!(fx.runtime.live_units(), 0);
        assert_eq!(fx.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn full_gate_rejects_without_side_effects() {
        let fx = Fixture::with_config(
            MockBehavior {
                hang: true,
                ..Default::default()
            },
            |c| c.limits.max_concurrent = 1,
        )
        .with_timeout(Duration::from_millis(300));

        let first = {
            let orchestrator = fx.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run(&ExecutionRequest::new("python", "while True: pass"))
                    .await
            })
        };
        while fx.runtime.started().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = fx
            .orchestrator
            .run(&ExecutionRequest::new("python", "print(2)"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overloaded);
        assert_eq!(fx.runtime.created().len(), 1);
        assert_eq!(fx.workspaces_left(), 1);

        let first = first.await.unwrap();
        assert!(matches!(first, Err(ExecutionError::Timeout { .. })));
        assert_eq!(fx.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn cleanup_failure_does_not_replace_the_result() {
        let fx = Fixture::new(MockBehavior {
            fail_remove: true,
            ..Default::default()
        });

        let result = fx
            .orchestrator
            .run(&ExecutionRequest::new("javascript", "console.log(3)"))
            .await
            .unwrap();

        assert_eq!(result.output, "console.log(3)");
        assert_eq!(fx.workspaces_left(), 0);
        assert_eq!(fx.orchestrator.admission().available(), 8);
    }

    #[tokio::test]
    async fn languages_come_from_the_registry() {
        let fx = Fixture::new(MockBehavior::default());
        let names: Vec<String> = fx
            .orchestrator
            .languages()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["javascript", "python"]);
    }
}
