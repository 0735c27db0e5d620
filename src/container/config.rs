//! Run requests and container specifications.
//!
//! A [`RunRequest`] describes one execution in caller terms (paths, token,
//! limits). [`ContainerSpecBuilder`] turns it into the [`ContainerSpec`] the
//! engine consumes, without any engine calls.

use crate::container::{MountTable, Result, RunnerError, VolumeMountPlanner};
use crate::env::{self, container, vars};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Default deadline for a run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default memory limit, in Docker byte-size notation.
pub const DEFAULT_MEMORY_LIMIT: &str = "2g";

/// Default CPU limit, in CPUs.
pub const DEFAULT_CPU_LIMIT: f64 = 1.0;

static MEMORY_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+)([kmg]?)b?$").expect("memory limit pattern is valid")
});

/// Per-run options a caller may override.
///
/// This is the closed set of knobs a run accepts; anything the engine offers
/// beyond these is deliberately not reachable from a request.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Container name; named runs are tracked in the registry while running
    pub name: Option<String>,
    /// Deadline for the container to exit
    pub timeout: Duration,
    /// Memory limit (`"512m"`, `"2g"`, ...)
    pub memory_limit: String,
    /// CPU limit in CPUs
    pub cpu_limit: f64,
    /// Extra environment; never overrides the fixed Cursor variables
    pub extra_env: HashMap<String, String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            name: None,
            timeout: DEFAULT_TIMEOUT,
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            cpu_limit: DEFAULT_CPU_LIMIT,
            extra_env: HashMap::new(),
        }
    }
}

impl RunOptions {
    /// Set the container name.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the run deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the memory limit.
    pub fn memory_limit<S: Into<String>>(mut self, limit: S) -> Self {
        self.memory_limit = limit.into();
        self
    }

    /// Set the CPU limit.
    pub fn cpu_limit(mut self, cpus: f64) -> Self {
        self.cpu_limit = cpus;
        self
    }

    /// Add an environment variable.
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }
}

/// One execution of a command against a project.
#[derive(Debug)]
pub struct RunRequest {
    /// Image in `name:tag` form
    pub image: String,
    /// Command argv
    pub command: Vec<String>,
    pub workspace_path: PathBuf,
    pub output_path: PathBuf,
    pub config_path: PathBuf,
    /// Cursor authentication token
    pub token: SecretString,
    pub options: RunOptions,
}

impl RunRequest {
    pub fn new<I, S>(
        image: impl Into<String>,
        command: I,
        workspace_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        token: SecretString,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            image: image.into(),
            command: command.into_iter().map(Into::into).collect(),
            workspace_path: workspace_path.into(),
            output_path: output_path.into(),
            config_path: config_path.into(),
            token,
            options: RunOptions::default(),
        }
    }

    /// Replace the run options.
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }
}

/// Everything the engine needs to create one container.
#[derive(Clone, PartialEq)]
pub struct ContainerSpec {
    /// Image name
    pub image: String,
    /// Command to run
    pub command: Vec<String>,
    /// Container name, if the run is named
    pub name: Option<String>,
    /// Bind mounts
    pub mounts: MountTable,
    /// Environment, fixed variables already merged over caller extras
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub working_dir: String,
    /// User
    pub user: String,
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Memory limit in bytes
    pub memory_bytes: i64,
    /// CPU limit in units of 1e-9 CPUs
    pub nano_cpus: i64,
    /// Always true: the executor waits on the container itself
    pub detach: bool,
    /// Always false: removal is done by the executor, not the engine
    pub auto_remove: bool,
}

impl ContainerSpec {
    /// Environment in `KEY=value` form.
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    /// Bind strings for the host configuration.
    pub fn binds(&self) -> Vec<String> {
        self.mounts.binds()
    }
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: BTreeMap<&str, &str> = self
            .env
            .iter()
            .map(|(k, v)| {
                if k == vars::CURSOR_TOKEN {
                    (k.as_str(), "[REDACTED]")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();

        f.debug_struct("ContainerSpec")
            .field("image", &self.image)
            .field("command", &self.command)
            .field("name", &self.name)
            .field("mounts", &self.mounts)
            .field("env", &env)
            .field("working_dir", &self.working_dir)
            .field("user", &self.user)
            .field("labels", &self.labels)
            .field("memory_bytes", &self.memory_bytes)
            .field("nano_cpus", &self.nano_cpus)
            .field("detach", &self.detach)
            .field("auto_remove", &self.auto_remove)
            .finish()
    }
}

/// Derives a [`ContainerSpec`] from a [`RunRequest`].
#[derive(Debug, Clone)]
pub struct ContainerSpecBuilder {
    user: String,
    labels: BTreeMap<String, String>,
}

impl Default for ContainerSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerSpecBuilder {
    /// Create a builder that runs as the image's `cursor-user`.
    pub fn new() -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(env::MANAGED_LABEL.to_string(), "true".to_string());
        Self {
            user: container::DEFAULT_USER.to_string(),
            labels,
        }
    }

    /// Set user to run as in the container.
    pub fn user<S: Into<String>>(mut self, user: S) -> Self {
        self.user = user.into();
        self
    }

    /// Add a label to every container built.
    pub fn label<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Build the container specification for `request`.
    ///
    /// # Errors
    ///
    /// Returns error if the image or command is empty, the timeout is zero,
    /// a resource limit is out of range, or a path cannot be resolved.
    pub fn build(&self, request: &RunRequest) -> Result<ContainerSpec> {
        if request.image.trim().is_empty() {
            return Err(RunnerError::InvalidRequest("image is required".to_string()));
        }
        if request.command.is_empty() {
            return Err(RunnerError::InvalidRequest("command is empty".to_string()));
        }
        if request.options.timeout.is_zero() {
            return Err(RunnerError::InvalidRequest(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let nano_cpus = nano_cpus(request.options.cpu_limit)?;
        let memory_bytes = parse_memory_limit(&request.options.memory_limit)?;
        let mounts = VolumeMountPlanner::plan(
            &request.workspace_path,
            &request.output_path,
            &request.config_path,
        )?;

        // Fixed variables are inserted last so caller extras cannot replace them.
        let mut env: BTreeMap<String, String> = request
            .options
            .extra_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.insert(
            vars::CURSOR_TOKEN.to_string(),
            request.token.expose_secret().to_string(),
        );
        env.insert(
            vars::WORKSPACE_PATH.to_string(),
            container::WORKSPACE_DIR.to_string(),
        );
        env.insert(
            vars::OUTPUT_PATH.to_string(),
            container::OUTPUT_DIR.to_string(),
        );
        env.insert(
            vars::CURSOR_CONFIG.to_string(),
            container::CONFIG_FILE.to_string(),
        );

        Ok(ContainerSpec {
            image: request.image.clone(),
            command: request.command.clone(),
            name: request.options.name.clone(),
            mounts,
            env,
            working_dir: container::WORKSPACE_DIR.to_string(),
            user: self.user.clone(),
            labels: self.labels.clone(),
            memory_bytes,
            nano_cpus,
            detach: true,
            auto_remove: false,
        })
    }
}

fn nano_cpus(cpu_limit: f64) -> Result<i64> {
    if !cpu_limit.is_finite() || cpu_limit <= 0.0 {
        return Err(RunnerError::InvalidResourceLimit(format!(
            "cpu limit must be a positive number, got {}",
            cpu_limit
        )));
    }
    Ok((cpu_limit * 1_000_000_000.0).round() as i64)
}

/// Parse a Docker-style memory limit (`"512m"`, `"2g"`, `"1024"`) into bytes.
///
/// Units are 1024-based and case-insensitive; a trailing `b` is accepted.
///
/// # Errors
///
/// Returns [`RunnerError::InvalidResourceLimit`] for malformed, zero or
/// overflowing values.
pub fn parse_memory_limit(limit: &str) -> Result<i64> {
    let invalid = || RunnerError::InvalidResourceLimit(format!("invalid memory limit '{}'", limit));

    let caps = MEMORY_LIMIT_RE.captures(limit.trim()).ok_or_else(invalid)?;
    let amount: i64 = caps[1].parse().map_err(|_| invalid())?;
    let multiplier: i64 = match caps[2].to_ascii_lowercase().as_str() {
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        _ => 1,
    };

    match amount.checked_mul(multiplier) {
        Some(bytes) if bytes > 0 => Ok(bytes),
        _ => Err(invalid()),
    }
}
