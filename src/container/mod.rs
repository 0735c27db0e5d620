//! Container execution layer.
//!
//! This module runs Cursor CLI commands inside ephemeral Docker/Podman containers
//! and guarantees that every container it creates is removed again, whichever way
//! the run ends.
//!
//! ## Architecture
//!
//! The container module is organized into several components:
//!
//! - [`volume`]: Host-to-container mount planning
//! - [`config`]: Run requests and the container specifications derived from them
//! - [`engine`]: The engine contract the executor drives, plus its error type
//! - [`client`]: Docker/Podman implementation of the engine via bollard
//! - [`executor`]: The per-run state machine and its async bridge
//! - [`registry`]: Named in-flight containers, for status queries and shutdown
//! - [`commands`]: Task-specific entry points (`analyze`, `review`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cursor_runner::container::{
//!     ContainerExecutor, CursorCommands, DockerEngine,
//! };
//! use cursor_runner::RunnerConfig;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunnerConfig::default();
//!     let engine = Arc::new(DockerEngine::connect(config.engine_config()).await?);
//!     let executor = ContainerExecutor::new(engine);
//!     let commands = CursorCommands::new(executor, &config);
//!
//!     let result = commands
//!         .analyze_async(
//!             &config.image,
//!             Path::new("./my-project"),
//!             Path::new("./out"),
//!             Path::new("./cursor-config"),
//!             "token".to_string().into(),
//!             config.run_options(),
//!         )
//!         .await?;
//!
//!     println!("exit code {}: {}", result.exit_code, result.output);
//!     Ok(())
//! }
//! ```

mod client;
mod commands;
mod config;
mod engine;
mod executor;
mod registry;
mod volume;

pub use client::{DockerEngine, EngineConfig};
pub use commands::CursorCommands;
pub use config::{
    ContainerSpec, ContainerSpecBuilder, DEFAULT_CPU_LIMIT, DEFAULT_MEMORY_LIMIT, DEFAULT_TIMEOUT,
    RunOptions, RunRequest, parse_memory_limit,
};
pub use engine::{ContainerDetails, ContainerEngine, ContainerHandle, EngineError};
pub use executor::{ContainerExecutor, RunPhase, RunResult};
pub use registry::{ContainerRegistry, RegistryCleanup};
pub use volume::{MountMode, MountTable, VolumeMount, VolumeMountPlanner};

use std::path::PathBuf;

/// Container runner errors.
///
/// Only [`RunnerError::Creation`] crosses the boundary of a run; failures after a
/// container exists are reported inside [`RunResult`] instead.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The container could not be created or started; nothing was left behind
    #[error("Failed to create container: {0}")]
    Creation(#[source] EngineError),

    /// A host path could not be resolved to an absolute path
    #[error("Invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// CPU or memory limit out of range
    #[error("Invalid resource limit: {0}")]
    InvalidResourceLimit(String),

    /// Request is missing something the container needs
    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    /// Engine call failed outside of a run (status refresh, connection)
    #[error("Container engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking worker running an async-bridged call did not complete
    #[error("Run worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
