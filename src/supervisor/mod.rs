//! Process supervision strategies.
//!
//! Exactly one strategy is chosen when the manager is built and used for
//! every start and stop of that run:
//!
//! - [`Detached`](detached::Detached): spawn in a new session, track the
//!   pid in a PID file, let the agent outlive the supervisor.
//! - [`LaunchdService`](service::LaunchdService): register a per-user
//!   launchd agent and let launchd own the process.
//! - [`OwnedChild`](child::OwnedChild): keep the agent as a direct child
//!   and report its exit through a channel.
//!
//! Strategies never interpret failures; they return a [`DaemonError`] that
//! says why, and the lifecycle manager decides what that means for state.

pub mod child;
pub mod detached;
pub mod service;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use crossbeam_channel::Sender;

use crate::errors::DaemonError;
use crate::layout::Layout;

pub use child::OwnedChild;
pub use detached::Detached;
pub use service::LaunchdService;

// ---------------------------------------------------------------------------
// Launch parameters
// ---------------------------------------------------------------------------

/// Everything a strategy needs to launch the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launch {
    pub binary: PathBuf,
    pub log: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl Launch {
    pub fn new(layout: &Layout, env: BTreeMap<String, String>) -> Self {
        Self {
            binary: layout.binary_path(),
            log: layout.log_path(),
            env,
        }
    }
}

/// Open the agent log in append mode, creating it if needed.
pub(crate) fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

// ---------------------------------------------------------------------------
// Child exit events
// ---------------------------------------------------------------------------

/// Reported by the owned-child waiter when the agent process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: u32,
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, when the process was killed (unix only).
    pub signal: Option<i32>,
    pub success: bool,
}

impl ChildExit {
    pub fn from_wait(pid: u32, result: io::Result<ExitStatus>) -> Self {
        match result {
            Ok(status) => Self {
                pid,
                code: status.code(),
                signal: exit_signal(&status),
                success: status.success(),
            },
            Err(_) => Self {
                pid,
                code: None,
                signal: None,
                success: false,
            },
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => write!(f, "killed by signal {sig}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

// ---------------------------------------------------------------------------
// Supervisor capability
// ---------------------------------------------------------------------------

/// Uniform start/stop contract shared by all strategies.
pub trait Supervisor: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Launch the agent. Returns its pid when the strategy knows it.
    fn start(&self, launch: &Launch) -> Result<Option<u32>, DaemonError>;

    /// Stop whatever this strategy launched. Stopping something that is
    /// already gone is not an error.
    fn stop(&self) -> Result<(), DaemonError>;

    /// Pid of a live process this strategy launched, if any.
    fn pid(&self) -> Option<u32>;
}

/// Which supervision strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Detached,
    Service,
    Child,
}

impl Strategy {
    /// Platform default: launchd on macOS, detached spawn elsewhere.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Strategy::Service
        } else {
            Strategy::Detached
        }
    }

    /// Parse the `supervisor.strategy` config value.
    pub fn from_config(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::detect()),
            "detached" | "pidfile" => Ok(Strategy::Detached),
            "service" | "launchd" => Ok(Strategy::Service),
            "child" | "owned" => Ok(Strategy::Child),
            other => Err(format!(
                "unknown supervisor strategy '{other}' (expected auto, detached, service, or child)"
            )),
        }
    }

    /// Build the supervisor for this strategy. `events` receives owned-child
    /// exits and is unused by the other strategies.
    pub fn build(
        self,
        layout: &Layout,
        service_label: &str,
        events: Sender<ChildExit>,
    ) -> Box<dyn Supervisor> {
        match self {
            Strategy::Detached => Box::new(Detached::new(layout.pid_path())),
            Strategy::Service => Box::new(LaunchdService::new(service_label)),
            Strategy::Child => Box::new(OwnedChild::new(events)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Detached => "detached",
            Strategy::Service => "service",
            Strategy::Child => "child",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Send `signal` to `pid`. A process that no longer exists is reported as
/// `Ok(false)`.
#[cfg(unix)]
pub(crate) fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<bool> {
    // SAFETY: kill(2) only inspects its integer arguments; an invalid pid
    // yields ESRCH rather than undefined behaviour.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(err)
    }
}
