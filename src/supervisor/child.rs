//! Owned child process.
//!
//! The agent stays a direct child of this process. A waiter thread blocks
//! on it and reports the exit twice: once to the stop path through a
//! private channel, once to the lifecycle manager through `events`.

use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, info, warn};

use super::{ChildExit, Launch, Strategy, Supervisor, open_log};
use crate::errors::DaemonError;

/// How long `stop` waits after the polite signal before killing.
const STOP_GRACE: Duration = Duration::from_secs(5);

struct Running {
    pid: u32,
    done: Receiver<ChildExit>,
}

pub struct OwnedChild {
    current: Mutex<Option<Running>>,
    events: Sender<ChildExit>,
    grace: Duration,
}

impl OwnedChild {
    pub fn new(events: Sender<ChildExit>) -> Self {
        Self {
            current: Mutex::new(None),
            events,
            grace: STOP_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn take_current(&self) -> Option<Running> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl Supervisor for OwnedChild {
    fn strategy(&self) -> Strategy {
        Strategy::Child
    }

    fn start(&self, launch: &Launch) -> Result<Option<u32>, DaemonError> {
        let mut cmd = Command::new(&launch.binary);
        cmd.envs(&launch.env).stdin(Stdio::null());
        match open_log(&launch.log).and_then(|log| Ok((log.try_clone()?, log))) {
            Ok((out, err)) => {
                cmd.stdout(out).stderr(err);
            }
            Err(e) => {
                warn!(path = %launch.log.display(), error = %e, "cannot open agent log; discarding output");
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| DaemonError::Start(format!("failed to start agentguard: {e}")))?;
        let pid = child.id();

        let (done_tx, done_rx) = bounded(1);
        let events = self.events.clone();
        let waiter = thread::Builder::new()
            .name(format!("agent-waiter-{pid}"))
            .spawn(move || {
                let exit = ChildExit::from_wait(pid, child.wait());
                debug!(pid, %exit, "owned agent exited");
                let _ = done_tx.send(exit.clone());
                // The manager may already be gone during shutdown.
                let _ = events.send(exit);
            });
        if let Err(e) = waiter {
            return Err(DaemonError::Start(format!(
                "failed to start exit watcher for pid {pid}: {e}"
            )));
        }

        let previous = self
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Running { pid, done: done_rx });
        if let Some(prev) = previous {
            warn!(old = prev.pid, new = pid, "replacing a still-tracked owned agent");
        }
        info!(pid, "launched owned agent");
        Ok(Some(pid))
    }

    fn stop(&self) -> Result<(), DaemonError> {
        let Some(running) = self.take_current() else {
            return Ok(());
        };
        let pid = running.pid;

        // Already exited on its own.
        if running.done.try_recv().is_ok() {
            return Ok(());
        }

        request_exit(pid);
        match running.done.recv_timeout(self.grace) {
            Ok(exit) => {
                info!(pid, %exit, "owned agent stopped");
            }
            Err(_) => {
                warn!(pid, grace_secs = self.grace.as_secs(), "owned agent ignored stop request; killing");
                force_kill(pid);
                if let Ok(exit) = running.done.recv() {
                    info!(pid, %exit, "owned agent killed");
                }
            }
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        let guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|r| r.done.is_empty())
            .map(|r| r.pid)
    }
}

#[cfg(unix)]
fn request_exit(pid: u32) {
    if let Err(e) = super::send_signal(pid, libc::SIGTERM) {
        warn!(pid, error = %e, "failed to send SIGTERM");
    }
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    if let Err(e) = super::send_signal(pid, libc::SIGKILL) {
        warn!(pid, error = %e, "failed to send SIGKILL");
    }
}

#[cfg(windows)]
fn request_exit(pid: u32) {
    force_kill(pid);
}

#[cfg(windows)]
fn force_kill(pid: u32) {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        warn!(pid, error = %e, "failed to run taskkill");
    }
}
