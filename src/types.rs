//! Shared types and data structures.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the supervised daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    #[default]
    Stopped,
    Starting,
    Running,
    Error,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DaemonState::Stopped => "stopped",
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time snapshot returned by `status`.
///
/// This is the externally visible contract; its JSON form is what
/// `warden status --json` prints.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub state: DaemonState,
    pub version: String,
    /// Process id when known, `0` otherwise.
    pub pid: u32,
    /// Human-readable uptime; empty unless managed and running.
    pub uptime: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub managed: bool,
}

/// Format an uptime using the largest applicable unit:
/// `"1h 2m 3s"`, `"2m 3s"`, or `"3s"`.
pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let h = total / 3600;
    let m = (total / 60) % 60;
    let s = total % 60;
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}
