//! Environment constants and path utilities for cursor-runner.
//!
//! This module centralizes the container-side paths, environment variable
//! names and configuration file locations used throughout the crate.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git, .vscode)
pub const RUNNER_DIR_NAME: &str = ".cursor-runner";

/// Configuration file name inside [`RUNNER_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Standalone configuration file name in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "cursor-runner.toml";

/// Label attached to every container this crate creates
pub const MANAGED_LABEL: &str = "cursor-runner.managed";

/// Paths as seen from inside the container.
pub mod container {
    /// Project sources, mounted read-only
    pub const WORKSPACE_DIR: &str = "/workspace";

    /// Analysis output, mounted read-write
    pub const OUTPUT_DIR: &str = "/output";

    /// Cursor configuration directory, mounted read-write
    pub const CONFIG_DIR: &str = "/config";

    /// Cursor configuration file inside [`CONFIG_DIR`]
    pub const CONFIG_FILE: &str = "/config/cursor-config.json";

    /// Unprivileged user the Cursor image ships with
    pub const DEFAULT_USER: &str = "cursor-user";
}

/// Environment variables handed to the Cursor CLI.
pub mod vars {
    /// Authentication token
    pub const CURSOR_TOKEN: &str = "CURSOR_TOKEN";

    pub const WORKSPACE_PATH: &str = "WORKSPACE_PATH";

    pub const OUTPUT_PATH: &str = "OUTPUT_PATH";

    pub const CURSOR_CONFIG: &str = "CURSOR_CONFIG";
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(RUNNER_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(RUNNER_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Build the standalone config file path in current directory
pub fn standalone_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}
