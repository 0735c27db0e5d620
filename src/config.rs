//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./cursor-runner.toml or ./.cursor-runner/config.toml
//! 2. User config: ~/.cursor-runner/config.toml
//! 3. System config: /etc/cursor-runner/config.toml
//! 4. Built-in defaults

use crate::container::{
    DEFAULT_CPU_LIMIT, DEFAULT_MEMORY_LIMIT, DEFAULT_TIMEOUT, EngineConfig, Result, RunOptions,
    RunnerError,
};
use crate::env;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Runner defaults, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Cursor CLI image
    pub image: String,
    /// Executable invoked for `analyze` / `review`
    pub tool: String,
    /// User inside the container
    pub user: String,
    /// Run deadline in seconds
    pub timeout_secs: u64,
    /// Memory limit (`"2g"`)
    pub memory_limit: String,
    /// CPU limit in CPUs
    pub cpu_limit: f64,
    /// Grace period for stopping a tracked container
    pub stop_timeout_secs: i32,
    /// Pull missing images before running
    pub auto_pull: bool,
    /// Explicit daemon address
    pub docker_host: Option<String>,
    /// Extra environment for every run
    pub env: HashMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            image: "cursor-cli:latest".to_string(),
            tool: "cursor".to_string(),
            user: env::container::DEFAULT_USER.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            cpu_limit: DEFAULT_CPU_LIMIT,
            stop_timeout_secs: engine.stop_timeout,
            auto_pull: engine.auto_pull,
            docker_host: engine.docker_host,
            env: HashMap::new(),
        }
    }
}

impl RunnerConfig {
    /// Load from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            RunnerError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Save to TOML file
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RunnerError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Run deadline as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Per-run options seeded from this configuration.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            name: None,
            timeout: self.timeout(),
            memory_limit: self.memory_limit.clone(),
            cpu_limit: self.cpu_limit,
            extra_env: self.env.clone(),
        }
    }

    /// Engine connection settings.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            docker_host: self.docker_host.clone(),
            stop_timeout: self.stop_timeout_secs,
            auto_pull: self.auto_pull,
            ..EngineConfig::default()
        }
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    ///
    /// # Errors
    ///
    /// Returns error if a discovered file cannot be loaded.
    pub fn discover_config() -> Result<RunnerConfig> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return RunnerConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(RunnerConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::first_existing(Self::get_config_candidates())
    }

    fn first_existing(candidates: Vec<PathBuf>) -> Option<PathBuf> {
        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                debug!("Found config file: {:?}", candidate);
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Get list of configuration file candidates in priority order
    pub fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::standalone_config_file_path(&current_dir));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/cursor-runner/config.toml"));

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Print discovery information
    pub fn show_discovery_info() {
        println!("Configuration discovery (highest priority first):");
        for candidate in Self::get_config_candidates() {
            let marker = if candidate.is_file() { "found" } else { "-" };
            println!("  [{}] {}", marker, candidate.display());
        }

        match Self::find_config_file() {
            Some(path) => println!("Active configuration: {}", path.display()),
            None => println!("Active configuration: built-in defaults"),
        }
    }
}
