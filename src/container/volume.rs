//! Volume mount planning.
//!
//! Maps the three host directories a Cursor run needs onto their fixed
//! locations inside the container.

use crate::container::{Result, RunnerError};
use crate::env::container::{CONFIG_DIR, OUTPUT_DIR, WORKSPACE_DIR};
use std::fmt;
use std::path::{Path, PathBuf};

/// Access mode of a bind mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    /// Mode suffix as used in Docker bind strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            MountMode::ReadOnly => "ro",
            MountMode::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single host path bound into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Absolute host path
    pub host_path: PathBuf,
    /// Path inside the container
    pub container_path: String,
    /// Access mode
    pub mode: MountMode,
}

impl VolumeMount {
    /// Docker bind string (`host:container:mode`).
    pub fn to_bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            self.mode
        )
    }
}

/// The complete set of mounts for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTable {
    mounts: Vec<VolumeMount>,
}

impl MountTable {
    pub fn mounts(&self) -> &[VolumeMount] {
        &self.mounts
    }

    /// Bind strings in the order the mounts were planned.
    pub fn binds(&self) -> Vec<String> {
        self.mounts.iter().map(VolumeMount::to_bind).collect()
    }

    /// Find the mount targeting `container_path`.
    pub fn get(&self, container_path: &str) -> Option<&VolumeMount> {
        self.mounts
            .iter()
            .find(|m| m.container_path == container_path)
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

/// Plans the workspace/output/config mounts for a run.
pub struct VolumeMountPlanner;

impl VolumeMountPlanner {
    /// Produce the mount table for a run.
    ///
    /// The workspace is mounted read-only; output and config are writable.
    /// Relative paths are resolved against the current directory without
    /// touching the filesystem otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::InvalidPath`] if a path cannot be made absolute.
    pub fn plan(workspace_path: &Path, output_path: &Path, config_path: &Path) -> Result<MountTable> {
        let mounts = vec![
            VolumeMount {
                host_path: Self::resolve(workspace_path)?,
                container_path: WORKSPACE_DIR.to_string(),
                mode: MountMode::ReadOnly,
            },
            VolumeMount {
                host_path: Self::resolve(output_path)?,
                container_path: OUTPUT_DIR.to_string(),
                mode: MountMode::ReadWrite,
            },
            VolumeMount {
                host_path: Self::resolve(config_path)?,
                container_path: CONFIG_DIR.to_string(),
                mode: MountMode::ReadWrite,
            },
        ];

        Ok(MountTable { mounts })
    }

    fn resolve(path: &Path) -> Result<PathBuf> {
        if path.as_os_str().is_empty() {
            return Err(RunnerError::InvalidPath {
                path: path.to_path_buf(),
                reason: "path is empty".to_string(),
            });
        }

        std::path::absolute(path).map_err(|e| RunnerError::InvalidPath {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
