//! # Cursor Runner
//!
//! Runs the Cursor code-analysis CLI inside ephemeral Docker/Podman containers
//! and hands the captured output and exit code back to the caller.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: Mount planning, container specs, the run state machine,
//!   the registry of named runs, and the `analyze` / `review` entry points
//! - **[`config`]**: Runner defaults and configuration file discovery
//! - **[`env`]**: Container-side paths, environment variable names and config locations
//!
//! ## Guarantees
//!
//! - Every container created for a run is removed before the run returns,
//!   whether it exited, failed, or timed out.
//! - A run either returns a [`RunResult`] or, if no container could be created,
//!   a [`RunnerError::Creation`]. Failures after creation are reported inside the
//!   result with `exit_code == -1`.
//! - Named runs can be inspected and stopped through the [`ContainerRegistry`]
//!   while they execute.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cursor_runner::{ContainerExecutor, CursorCommands, DockerEngine, RunnerConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunnerConfig::default();
//!     let engine = Arc::new(DockerEngine::connect(config.engine_config()).await?);
//!     let commands = CursorCommands::new(ContainerExecutor::new(engine), &config);
//!
//!     let result = commands
//!         .review_async(
//!             &config.image,
//!             Path::new("."),
//!             Path::new("./cursor-output"),
//!             Path::new("./.cursor"),
//!             std::env::var("CURSOR_TOKEN")?.into(),
//!             config.run_options(),
//!         )
//!         .await?;
//!
//!     println!("{}", result.output);
//!     Ok(())
//! }
//! ```

/// Container execution layer.
///
/// Everything needed to turn a "run this command against this project"
/// request into a container, execute it, and clean it up.
pub mod container;

/// Runner configuration and discovery.
pub mod config;

/// Environment constants and path utilities.
///
/// Centralizes container-side paths and config file locations.
pub mod env;

pub use config::{ConfigDiscovery, RunnerConfig};

pub use container::{
    ContainerEngine, ContainerExecutor, ContainerRegistry, ContainerSpec, ContainerSpecBuilder,
    CursorCommands, DockerEngine, RunOptions, RunRequest, RunResult, RunnerError,
};
