//! Cursor task entry points.
//!
//! `analyze` and `review` are fixed specializations of a generic run: they only
//! choose the Cursor subcommand. Everything else is the executor's business.

use crate::config::RunnerConfig;
use crate::container::{
    ContainerExecutor, ContainerSpecBuilder, Result, RunOptions, RunRequest, RunResult,
};
use crate::env::container::WORKSPACE_DIR;
use secrecy::SecretString;
use std::path::Path;

const ANALYZE: &str = "analyze";
const REVIEW: &str = "review";

/// Task-level facade over [`ContainerExecutor`].
#[derive(Clone)]
pub struct CursorCommands {
    executor: ContainerExecutor,
    builder: ContainerSpecBuilder,
    tool: String,
}

impl CursorCommands {
    /// Create the facade using the tool name and container user from `config`.
    pub fn new(executor: ContainerExecutor, config: &RunnerConfig) -> Self {
        Self {
            executor,
            builder: ContainerSpecBuilder::new().user(&config.user),
            tool: config.tool.clone(),
        }
    }

    pub fn executor(&self) -> &ContainerExecutor {
        &self.executor
    }

    /// Argv for a Cursor subcommand run against the mounted workspace.
    pub fn command_for(&self, subcommand: &str) -> Vec<String> {
        vec![
            self.tool.clone(),
            subcommand.to_string(),
            WORKSPACE_DIR.to_string(),
        ]
    }

    /// Run an arbitrary request.
    ///
    /// # Errors
    ///
    /// Returns error if the request is invalid or the container could not be
    /// created.
    pub fn run_command(&self, request: RunRequest) -> Result<RunResult> {
        let spec = self.builder.build(&request)?;
        self.executor.run(&spec, request.timeout())
    }

    /// Async-bridged [`run_command`](Self::run_command).
    ///
    /// # Errors
    ///
    /// Same as [`run_command`](Self::run_command), plus worker failure.
    pub async fn run_command_async(&self, request: RunRequest) -> Result<RunResult> {
        let spec = self.builder.build(&request)?;
        self.executor.run_async(spec, request.timeout()).await
    }

    /// Analyze the project at `project_path`.
    ///
    /// # Errors
    ///
    /// Same as [`run_command`](Self::run_command).
    pub fn analyze(
        &self,
        image: &str,
        project_path: &Path,
        output_path: &Path,
        config_path: &Path,
        token: SecretString,
        options: RunOptions,
    ) -> Result<RunResult> {
        self.run_command(self.request(
            ANALYZE,
            image,
            project_path,
            output_path,
            config_path,
            token,
            options,
        ))
    }

    /// Review the project at `project_path`.
    ///
    /// # Errors
    ///
    /// Same as [`run_command`](Self::run_command).
    pub fn review(
        &self,
        image: &str,
        project_path: &Path,
        output_path: &Path,
        config_path: &Path,
        token: SecretString,
        options: RunOptions,
    ) -> Result<RunResult> {
        self.run_command(self.request(
            REVIEW,
            image,
            project_path,
            output_path,
            config_path,
            token,
            options,
        ))
    }

    /// Async-bridged [`analyze`](Self::analyze).
    ///
    /// # Errors
    ///
    /// Same as [`run_command_async`](Self::run_command_async).
    pub async fn analyze_async(
        &self,
        image: &str,
        project_path: &Path,
        output_path: &Path,
        config_path: &Path,
        token: SecretString,
        options: RunOptions,
    ) -> Result<RunResult> {
        let request = self.request(
            ANALYZE,
            image,
            project_path,
            output_path,
            config_path,
            token,
            options,
        );
        self.run_command_async(request).await
    }

    /// Async-bridged [`review`](Self::review).
    ///
    /// # Errors
    ///
    /// Same as [`run_command_async`](Self::run_command_async).
    pub async fn review_async(
        &self,
        image: &str,
        project_path: &Path,
        output_path: &Path,
        config_path: &Path,
        token: SecretString,
        options: RunOptions,
    ) -> Result<RunResult> {
        let request = self.request(
            REVIEW,
            image,
            project_path,
            output_path,
            config_path,
            token,
            options,
        );
        self.run_command_async(request).await
    }

    #[allow(clippy::too_many_arguments)]
    fn request(
        &self,
        subcommand: &str,
        image: &str,
        project_path: &Path,
        output_path: &Path,
        config_path: &Path,
        token: SecretString,
        options: RunOptions,
    ) -> RunRequest {
        RunRequest::new(
            image,
            self.command_for(subcommand),
            project_path,
            output_path,
            config_path,
            token,
        )
        .with_options(options)
    }
}
