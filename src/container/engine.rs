//! Container engine contract.
//!
//! [`ContainerEngine`] is the seam between the run state machine and whatever
//! actually talks to the daemon. The production implementation is
//! [`DockerEngine`](super::DockerEngine); tests drive the executor through an
//! in-memory double instead.

use super::ContainerSpec;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Errors reported by a container engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Docker/Podman API error
    #[error("{0}")]
    Api(#[from] bollard::errors::Error),

    /// Container or image not found
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine did not report an exit before the deadline
    #[error("timed out after {}s waiting for container to exit", .0.as_secs_f64())]
    Timeout(Duration),

    /// Anything else the engine reported
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Whether this error is a deadline expiry rather than an engine fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout(_))
    }
}

/// Engine-side reference to a created container.
///
/// Handles are plain values; cloning one never shares mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    /// Engine-assigned container ID
    pub id: String,
    /// Container name, when one was requested
    pub name: Option<String>,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// First 12 characters of the ID, as the docker CLI prints it.
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

/// Freshly inspected container state.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerDetails {
    /// Container ID
    pub id: String,
    /// Container name as the engine reports it
    pub name: String,
    /// Engine status string (`created`, `running`, `exited`, ...)
    pub engine_status: String,
    /// Creation timestamp, when the engine reported a parseable one
    pub created_at: Option<DateTime<Utc>>,
    /// Raw state object as reported by the engine
    pub raw_state: serde_json::Value,
}

/// Blocking container engine operations used by the executor and registry.
///
/// Implementations must keep two promises the executor relies on:
/// `create_and_start` leaves nothing behind when it fails, and `remove` of a
/// container that no longer exists succeeds.
pub trait ContainerEngine: Send + Sync {
    /// Create a container from `spec` and start it detached.
    fn create_and_start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError>;

    /// Block until the container exits, returning its exit code.
    ///
    /// A non-zero exit is `Ok`; only failure to observe the exit is an error.
    fn wait(&self, handle: &ContainerHandle, timeout: Duration) -> Result<i64, EngineError>;

    /// Full combined stdout/stderr history of the container.
    fn logs(&self, handle: &ContainerHandle) -> Result<Vec<u8>, EngineError>;

    /// Remove the container.
    fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), EngineError>;

    /// Stop the container, waiting for the engine's grace period.
    fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Re-read container state from the engine.
    fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerDetails, EngineError>;
}
