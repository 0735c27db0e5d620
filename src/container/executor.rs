//! Single-run container execution.
//!
//! [`ContainerExecutor::run`] drives one container through
//! `Created → Started → Waiting → {Completed | WaitFailed} → LogsFetched → Removed`.
//! Once a container exists, removal is owned by a guard that runs on every exit
//! path, panics included, and never runs twice.

use crate::container::{
    ContainerEngine, ContainerHandle, ContainerRegistry, ContainerSpec, EngineError, Result,
    RunnerError,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

/// Exit code reported when the container's own exit could not be observed.
pub const UNOBSERVED_EXIT_CODE: i64 = -1;

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Container exit code, or `-1` if it could not be observed
    pub exit_code: i64,
    /// Combined stdout/stderr from the container log
    pub output: String,
    /// Empty on success; the log on a non-zero exit; the failure message otherwise
    pub error: String,
    /// Engine-assigned container ID
    pub container_id: String,
    /// Whether the run hit its deadline
    pub timed_out: bool,
}

impl RunResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Whether the exit code is a real container exit rather than the sentinel.
    pub fn observed(&self) -> bool {
        self.exit_code != UNOBSERVED_EXIT_CODE
    }
}

/// Phases of a run, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Created,
    Started,
    Waiting,
    Completed,
    WaitFailed,
    LogsFetched,
    Removed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Created => "created",
            RunPhase::Started => "started",
            RunPhase::Waiting => "waiting",
            RunPhase::Completed => "completed",
            RunPhase::WaitFailed => "wait-failed",
            RunPhase::LogsFetched => "logs-fetched",
            RunPhase::Removed => "removed",
        };
        f.write_str(name)
    }
}

enum WaitOutcome {
    Exited(i64),
    Failed { message: String, timed_out: bool },
}

/// Removes the container and its registry entry when dropped.
struct RunGuard<'a> {
    engine: &'a dyn ContainerEngine,
    registry: &'a ContainerRegistry,
    handle: ContainerHandle,
    /// Registry key, taken from the requested name
    name: Option<String>,
    removed: bool,
}

impl<'a> RunGuard<'a> {
    fn new(
        engine: &'a dyn ContainerEngine,
        registry: &'a ContainerRegistry,
        handle: ContainerHandle,
        name: Option<String>,
    ) -> Self {
        Self {
            engine,
            registry,
            handle,
            name,
            removed: false,
        }
    }

    fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    fn release(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        if let Err(e) = self.engine.remove(&self.handle, true) {
            warn!(
                "Failed to remove container {}: {}",
                self.handle.short_id(),
                e
            );
        }

        if let Some(name) = &self.name {
            self.registry.deregister(name, &self.handle.id);
        }

        debug!(container = %self.handle.short_id(), phase = %RunPhase::Removed, "Run finished");
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Runs container specs to completion.
///
/// Cloning is cheap; clones share the engine and the registry.
#[derive(Clone)]
pub struct ContainerExecutor {
    engine: Arc<dyn ContainerEngine>,
    registry: ContainerRegistry,
}

impl ContainerExecutor {
    /// Create an executor with its own registry.
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        let registry = ContainerRegistry::new(engine.clone());
        Self { engine, registry }
    }

    /// Create an executor that tracks named runs in `registry`.
    pub fn with_registry(registry: ContainerRegistry) -> Self {
        Self {
            engine: registry.engine(),
            registry,
        }
    }

    /// Registry of named in-flight containers.
    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }

    /// Run `spec` to completion and remove its container.
    ///
    /// Blocks the calling thread until the container exits, `timeout` elapses,
    /// or the engine fails. Failures after the container exists are reported in
    /// the returned [`RunResult`] with `exit_code == -1`.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Creation`] if the container could not be created
    /// or started. No container exists in that case.
    pub fn run(&self, spec: &ContainerSpec, timeout: Duration) -> Result<RunResult> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, image = %spec.image);
        let _enter = span.enter();

        info!("Running command: {}", spec.command.join(" "));

        let handle = match self.engine.create_and_start(spec) {
            Ok(handle) => {
                debug!(phase = %RunPhase::Created, "Container created");
                handle
            }
            Err(e) => {
                error!("Failed to create container: {}", e);
                return Err(RunnerError::Creation(e));
            }
        };
        info!(
            "Container created and started: {} ({})",
            handle.short_id(),
            spec.name.as_deref().unwrap_or("unnamed")
        );
        debug!(phase = %RunPhase::Started, "Created container is running");

        let mut guard = RunGuard::new(
            self.engine.as_ref(),
            &self.registry,
            handle,
            spec.name.clone(),
        );
        if let Some(name) = &spec.name {
            self.registry.register(name, guard.handle().clone());
        }

        debug!(phase = %RunPhase::Waiting, timeout_secs = timeout.as_secs_f64(), "Waiting for exit");
        let outcome = match self.engine.wait(guard.handle(), timeout) {
            Ok(code) => {
                debug!(phase = %RunPhase::Completed, exit_code = code, "Container exited");
                WaitOutcome::Exited(code)
            }
            Err(e) => {
                error!("Error while waiting for container: {}", e);
                debug!(phase = %RunPhase::WaitFailed, "Exit not observed");
                WaitOutcome::Failed {
                    timed_out: e.is_timeout(),
                    message: e.to_string(),
                }
            }
        };

        let container_id = guard.handle().id.clone();
        let result = match outcome {
            WaitOutcome::Exited(code) => match self.fetch_logs(guard.handle()) {
                Ok(output) => {
                    info!("Command finished with exit code: {}", code);
                    RunResult {
                        exit_code: code,
                        error: if code == 0 {
                            String::new()
                        } else {
                            output.clone()
                        },
                        output,
                        container_id,
                        timed_out: false,
                    }
                }
                Err(e) => {
                    error!("Failed to fetch logs after exit {}: {}", code, e);
                    RunResult {
                        exit_code: UNOBSERVED_EXIT_CODE,
                        output: String::new(),
                        error: e.to_string(),
                        container_id,
                        timed_out: false,
                    }
                }
            },
            WaitOutcome::Failed { message, timed_out } => {
                let output = self.fetch_logs(guard.handle()).unwrap_or_else(|e| {
                    warn!("No log snapshot available: {}", e);
                    String::new()
                });
                RunResult {
                    exit_code: UNOBSERVED_EXIT_CODE,
                    output,
                    error: message,
                    container_id,
                    timed_out,
                }
            }
        };

        guard.release();
        Ok(result)
    }

    /// Run `spec` on a blocking worker so an async caller is not stalled.
    ///
    /// # Errors
    ///
    /// Returns the creation error of the underlying [`run`](Self::run), or
    /// [`RunnerError::Join`] if the worker panicked.
    pub async fn run_async(&self, spec: ContainerSpec, timeout: Duration) -> Result<RunResult> {
        let executor = self.clone();
        tokio::task::spawn_blocking(move || executor.run(&spec, timeout)).await?
    }

    fn fetch_logs(&self, handle: &ContainerHandle) -> std::result::Result<String, EngineError> {
        let bytes = self.engine.logs(handle)?;
        debug!(phase = %RunPhase::LogsFetched, bytes = bytes.len(), "Fetched logs");
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
