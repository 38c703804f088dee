//! Detached spawn with PID-file tracking.
//!
//! The agent is launched in its own session with output appended to the
//! log, its pid written to the PID file, and the process handle dropped so
//! it keeps running after the supervisor exits. A later session finds it
//! again through the PID file.
//!
//! The PID file also records the process start time read right after the
//! spawn. A pid is only treated as ours while the live process still has
//! that start time, so a reused pid or a hand-written PID file never gets
//! signalled.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Launch, Strategy, Supervisor, open_log};
use crate::errors::DaemonError;

/// Poll budget after SIGTERM: 10 checks, 500 ms apart.
const STOP_POLL_ATTEMPTS: u32 = 10;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct Detached {
    pid_path: PathBuf,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl Detached {
    pub fn new(pid_path: impl Into<PathBuf>) -> Self {
        Self {
            pid_path: pid_path.into(),
            poll_attempts: STOP_POLL_ATTEMPTS,
            poll_interval: STOP_POLL_INTERVAL,
        }
    }

    /// Override the post-SIGTERM exit polling.
    pub fn with_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval = interval;
        self
    }

    /// Pid recorded in the PID file, if present and parseable.
    pub fn read_pid(&self) -> Option<u32> {
        self.read_entry().map(|(pid, _)| pid)
    }

    /// Pid and recorded start time from the PID file.
    fn read_entry(&self) -> Option<(u32, Option<String>)> {
        let contents = fs::read_to_string(&self.pid_path).ok()?;
        let mut lines = contents.lines();
        let pid = lines
            .next()?
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|&pid| pid > 0)?;
        let started = lines
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        Some((pid, started))
    }

    /// The recorded pid, if it is still the process this supervisor
    /// launched.
    fn owned_pid(&self) -> Option<u32> {
        let (pid, started) = self.read_entry()?;
        let started = started?;
        if process_gone(pid) {
            return None;
        }
        (process_start_time(pid).as_deref() == Some(started.as_str())).then_some(pid)
    }

    fn remove_pid_file(&self) {
        match fs::remove_file(&self.pid_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.pid_path.display(), error = %e, "failed to remove PID file"),
        }
    }
}

impl Supervisor for Detached {
    fn strategy(&self) -> Strategy {
        Strategy::Detached
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
        detach(&mut cmd);

        let child = cmd
            .spawn()
            .map_err(|e| DaemonError::Start(format!("failed to start agentguard: {e}")))?;
        let pid = child.id();
        let started = process_start_time(pid).unwrap_or_default();

        if let Err(e) = fs::write(&self.pid_path, format!("{pid}\n{started}\n")) {
            warn!(path = %self.pid_path.display(), error = %e, "failed to write PID file");
        }

        // Dropping a std Child neither kills nor waits on it.
        drop(child);
        info!(pid, "launched detached agent");
        Ok(Some(pid))
    }

    fn stop(&self) -> Result<(), DaemonError> {
        let Some(pid) = self.owned_pid() else {
            match self.read_pid() {
                Some(pid) => {
                    info!(pid, "PID file does not name a process warden launched; removing it")
                }
                None => {
                    debug!(path = %self.pid_path.display(), "no PID file; agent already stopped")
                }
            }
            self.remove_pid_file();
            return Ok(());
        };

        if terminate(pid) {
            let mut exited = false;
            for _ in 0..self.poll_attempts {
                thread::sleep(self.poll_interval);
                if process_gone(pid) {
                    exited = true;
                    break;
                }
            }
            if exited {
                info!(pid, "detached agent exited");
            } else {
                warn!(pid, "detached agent did not confirm exit after SIGTERM");
            }
        }

        self.remove_pid_file();
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.owned_pid()
    }
}

// ---------------------------------------------------------------------------
// Platform plumbing
// ---------------------------------------------------------------------------

/// Put the child in a new session so it survives the supervisor's terminal.
#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid(2) is async-signal-safe, which is all pre_exec requires.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

/// Ask `pid` to exit. Returns `false` when there is nothing left to wait
/// for (already gone, or the signal could not be delivered).
#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    match super::send_signal(pid, libc::SIGTERM) {
        Ok(alive) => alive,
        Err(e) => {
            warn!(pid, error = %e, "failed to signal detached agent");
            false
        }
    }
}

#[cfg(windows)]
fn terminate(pid: u32) -> bool {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = status {
        warn!(pid, error = %e, "failed to run taskkill");
    }
    // taskkill /F is synchronous; nothing to poll.
    false
}

/// Whether `pid` has exited.
///
/// `waitpid(WNOHANG)` comes first: when the agent was launched by this
/// process it is our child and would otherwise linger as a zombie that
/// `kill(pid, 0)` still reports as alive. For a pid launched by an earlier
/// session waitpid fails with `ECHILD` and the existence check decides,
/// with only `ESRCH` meaning gone (`EPERM` means it exists).
#[cfg(unix)]
pub(crate) fn process_gone(pid: u32) -> bool {
    let raw = pid as libc::pid_t;
    let mut status: libc::c_int = 0;
    // SAFETY: WNOHANG never blocks and `status` is a valid out pointer.
    let reaped = unsafe { libc::waitpid(raw, &mut status, libc::WNOHANG) };
    if reaped == raw {
        return true;
    }
    if reaped == 0 {
        return false;
    }
    matches!(super::send_signal(pid, 0), Ok(false))
}

/// Start time of `pid` as an opaque token, stable for the life of the
/// process: field 22 of `/proc/<pid>/stat` (clock ticks since boot).
#[cfg(target_os = "linux")]
fn process_start_time(pid: u32) -> Option<String> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The command name may contain spaces and parens; fields resume after
    // the last ')', starting at field 3.
    let (_, rest) = stat.rsplit_once(')')?;
    rest.split_whitespace().nth(19).map(str::to_string)
}

/// Start time of `pid` as reported by `ps`.
#[cfg(all(unix, not(target_os = "linux")))]
fn process_start_time(pid: u32) -> Option<String> {
    let out = Command::new("ps")
        .args(["-o", "lstart=", "-p", &pid.to_string()])
        .output()
        .ok()?;
    let started = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (out.status.success() && !started.is_empty()).then_some(started)
}

/// Image name of `pid`; tasklist exposes no start time.
#[cfg(windows)]
fn process_start_time(pid: u32) -> Option<String> {
    let out = Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
        .output()
        .ok()?;
    let line = String::from_utf8_lossy(&out.stdout).lines().next()?.to_string();
    let image = line.split(',').next()?.trim_matches('"').to_string();
    (!image.is_empty() && line.contains(&format!("\"{pid}\""))).then_some(image)
}

#[cfg(windows)]
pub(crate) fn process_gone(pid: u32) -> bool {
    let out = Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH"])
        .output();
    match out {
        Ok(out) => !String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()),
        Err(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::TempDir;

    /// Write an executable shell script standing in for the agent.
    fn fake_agent(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("agentguard");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn launch(dir: &Path, body: &str) -> Launch {
        let mut env = BTreeMap::new();
        env.insert("AGENTGUARD_GATE_ENABLED".to_string(), "true".to_string());
        Launch {
            binary: fake_agent(dir, body),
            log: dir.join("agentguard.log"),
            env,
        }
    }

    fn supervisor(dir: &Path) -> Detached {
        Detached::new(dir.join("agentguard.pid")).with_polling(40, Duration::from_millis(50))
    }

    #[test]
    fn start_writes_pid_and_stop_removes_it() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path());

        let pid = sup.start(&launch(dir.path(), "exec sleep 30")).unwrap().unwrap();
        assert_eq!(sup.read_pid(), Some(pid));
        assert_eq!(sup.pid(), Some(pid));

        sup.stop().unwrap();
        assert!(!dir.path().join("agentguard.pid").exists());
        assert!(process_gone(pid));
        assert_eq!(sup.pid(), None);
    }

    #[test]
    fn output_and_env_reach_the_log() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path());
        fs::write(dir.path().join("agentguard.log"), "previous run\n").unwrap();

        sup.start(&launch(dir.path(), "echo gate=$AGENTGUARD_GATE_ENABLED"))
            .unwrap();
        let log = dir.path().join("agentguard.log");
        let mut contents = String::new();
        for _ in 0..100 {
            contents = fs::read_to_string(&log).unwrap();
            if contents.contains("gate=") {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        // Appended, not truncated.
        assert!(contents.starts_with("previous run\n"), "log was: {contents:?}");
        assert!(contents.contains("gate=true"), "log was: {contents:?}");
        sup.stop().unwrap();
    }

    #[test]
    fn stop_without_pid_file_is_ok() {
        let dir = TempDir::new().unwrap();
        supervisor(dir.path()).stop().unwrap();
    }

    #[test]
    fn stop_with_garbage_pid_file_is_ok_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("agentguard.pid");
        fs::write(&pid_path, "not_a_number\n").unwrap();

        supervisor(dir.path()).stop().unwrap();
        assert!(!pid_path.exists());
    }

    #[test]
    fn stop_with_dead_pid_removes_file() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("agentguard.pid");
        // Very unlikely to be a live pid.
        fs::write(&pid_path, "4294967\n").unwrap();

        supervisor(dir.path()).stop().unwrap();
        assert!(!pid_path.exists());
    }

    #[test]
    fn stop_removes_pid_file_even_when_exit_unconfirmed() {
        let dir = TempDir::new().unwrap();
        let sup = Detached::new(dir.path().join("agentguard.pid"))
            .with_polling(2, Duration::from_millis(10));

        // Ignores SIGTERM, so the short poll budget runs out.
        let pid = sup
            .start(&launch(dir.path(), "trap '' TERM\nwhile true; do sleep 1; done"))
            .unwrap()
            .unwrap();
        thread::sleep(Duration::from_millis(100));

        sup.stop().unwrap();
        assert!(!dir.path().join("agentguard.pid").exists());

        send_kill(pid);
    }

    #[test]
    fn foreign_pid_in_pid_file_is_never_signalled() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("agentguard.pid");
        let mut other = Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(&pid_path, format!("{}\n", other.id())).unwrap();
        let sup = supervisor(dir.path());

        assert_eq!(sup.read_pid(), Some(other.id()));
        assert_eq!(sup.pid(), None);

        sup.stop().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(other.try_wait().unwrap().is_none(), "unrelated process was killed");
        assert!(!pid_path.exists());

        other.kill().unwrap();
        other.wait().unwrap();
    }

    #[test]
    fn start_time_mismatch_is_not_ours() {
        let dir = TempDir::new().unwrap();
        let pid_path = dir.path().join("agentguard.pid");
        let mut other = Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(&pid_path, format!("{}\n1\n", other.id())).unwrap();

        assert_eq!(supervisor(dir.path()).pid(), None);

        other.kill().unwrap();
        other.wait().unwrap();
    }

    #[test]
    fn pid_file_records_start_time() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path());
        let pid = sup.start(&launch(dir.path(), "exec sleep 30")).unwrap().unwrap();

        let contents = fs::read_to_string(dir.path().join("agentguard.pid")).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some(pid.to_string().as_str()));
        assert_eq!(lines.next().map(str::to_string), process_start_time(pid));

        sup.stop().unwrap();
    }

    #[test]
    fn missing_binary_is_a_start_error() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path());
        let launch = Launch {
            binary: dir.path().join("nope"),
            log: dir.path().join("agentguard.log"),
            env: BTreeMap::new(),
        };

        let err = sup.start(&launch).unwrap_err();
        assert!(matches!(err, DaemonError::Start(_)));
        assert!(format!("{err}").starts_with("failed to start agentguard"));
        assert!(!dir.path().join("agentguard.pid").exists());
    }

    #[test]
    fn current_process_is_not_gone() {
        assert!(!process_gone(std::process::id()));
    }

    fn send_kill(pid: u32) {
        let _ = super::super::send_signal(pid, libc::SIGKILL);
        for _ in 0..50 {
            if process_gone(pid) {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}
