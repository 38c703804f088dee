//! On-disk layout of the user data directory.
//!
//! Everything the supervisor persists lives in one directory: the installed
//! binary, the version marker, the PID file of a detached launch, and the
//! agent's log.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// File name of the installed agent executable.
#[cfg(windows)]
pub const BINARY_NAME: &str = "agentguard.exe";
#[cfg(not(windows))]
pub const BINARY_NAME: &str = "agentguard";

/// Resolved paths inside the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    data_dir: PathBuf,
}

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn binary_path(&self) -> PathBuf {
        self.data_dir.join(BINARY_NAME)
    }

    /// Plain-text marker recording the installed version (no `v` prefix).
    pub fn version_path(&self) -> PathBuf {
        self.data_dir.join("version.txt")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.data_dir.join("agentguard.pid")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("agentguard.log")
    }

    /// Create the data directory if it does not exist yet.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data directory {}", self.data_dir.display()))
    }
}
