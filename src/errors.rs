//! Application error types and user-facing error formatting.
//!
//! Provides structured error types for the supervisor:
//! - [`DaemonError`] for lifecycle failures (install, start, update, ...)
//! - [`WardenError`] as the unified top-level error type
//!
//! The [`WardenError`] type carries contextual hints and exit codes so that
//! `main()` can present human-readable diagnostics on stderr without ever
//! exposing raw panics or debug formatting.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

/// Process exit codes.
///
/// * `0` - success
/// * `1` - general runtime error
/// * `2` - usage / argument error (bad CLI invocation)
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

// ---------------------------------------------------------------------------
// Lifecycle errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the lifecycle manager and its collaborators.
///
/// Each variant corresponds to one failure class the caller may want to
/// treat differently: a health timeout means the binary did launch, and a
/// partial update means the new binary is already installed.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// No release asset is published for this OS / architecture pair.
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// The release index could not be queried or parsed.
    #[error("{0}")]
    Release(String),

    /// Downloading or installing the binary failed. The previously
    /// installed binary is untouched.
    #[error("{0}")]
    Install(String),

    /// The supervisor could not launch the daemon.
    #[error("{0}")]
    Start(String),

    /// The daemon was launched but never answered the health probe.
    #[error("daemon started but not responding")]
    HealthTimeout,

    /// The binary was replaced but the new version failed to start.
    #[error("updated but failed to restart: {0}")]
    PartialUpdate(String),

    /// A supervisor-level operation failed (service manager, signals).
    #[error("{0}")]
    Supervisor(String),
}

// ---------------------------------------------------------------------------
// Unified application error
// ---------------------------------------------------------------------------

/// Unified error type for the entire application.
///
/// Allows callers to propagate any layer's error through a single `Result`
/// type while still enabling pattern matching on the specific variant.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error(transparent)]
    Daemon(#[from] DaemonError),

    /// The configuration file could not be read or parsed.
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A usage / argument error (exit code 2).
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    /// Return the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            WardenError::Usage(_) => EXIT_USAGE,
            _ => EXIT_ERROR,
        }
    }

    /// Return an optional human-readable hint that may help the user fix
    /// the problem.  Returns `None` when no specific guidance applies.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            WardenError::Daemon(DaemonError::UnsupportedPlatform { .. }) => {
                Some("install the agent binary manually into the data directory")
            }
            WardenError::Daemon(DaemonError::Release(_)) => {
                Some("check your network connection or the release index URL")
            }
            WardenError::Daemon(DaemonError::HealthTimeout) => {
                Some("the process may still be starting; inspect agentguard.log in the data directory")
            }
            WardenError::Daemon(DaemonError::PartialUpdate(_)) => {
                Some("the new binary is installed; run `warden start` to retry")
            }
            WardenError::Config(_) => Some("fix the config file or pass a different --config"),
            WardenError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Some("check permissions on the data directory")
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
