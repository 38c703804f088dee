//! launchd per-user agent registration.
//!
//! The agent is described by a plist in `~/Library/LaunchAgents` and
//! registered in the `gui/<uid>` domain, then started explicitly with
//! `launchctl kickstart`. Neither `RunAtLoad` nor `KeepAlive` is set, so
//! launchd never restarts or launches the agent on its own.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use super::{Launch, Strategy, Supervisor};
use crate::config;
use crate::errors::DaemonError;

/// Pause between booting out a stale registration and bootstrapping anew;
/// launchd tears services down asynchronously.
const SETTLE: Duration = Duration::from_millis(500);

/// Runs one launchctl invocation; `Err` carries its combined output.
pub type Runner = dyn Fn(&[&str]) -> Result<String, String> + Send + Sync;

pub struct LaunchdService {
    label: String,
    plist_path: PathBuf,
    runner: Box<Runner>,
}

impl LaunchdService {
    pub fn new(label: &str) -> Self {
        let agents_dir = config::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library")
            .join("LaunchAgents");
        Self::with_plist_path(label, agents_dir.join(format!("{label}.plist")))
    }

    pub fn with_plist_path(label: &str, plist_path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.to_string(),
            plist_path: plist_path.into(),
            runner: Box::new(launchctl),
        }
    }

    /// Replace the launchctl runner.
    pub fn with_runner<F>(mut self, runner: F) -> Self
    where
        F: Fn(&[&str]) -> Result<String, String> + Send + Sync + 'static,
    {
        self.runner = Box::new(runner);
        self
    }

    /// `gui/<uid>/<label>`, the service target for bootout / list.
    fn service_target(&self) -> String {
        format!("{}/{}", gui_domain(), self.label)
    }

    /// Write (or overwrite) the service descriptor.
    pub fn install_descriptor(&self, launch: &Launch) -> Result<(), DaemonError> {
        if let Some(parent) = self.plist_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DaemonError::Supervisor(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        fs::write(&self.plist_path, render_plist(&self.label, launch)).map_err(|e| {
            DaemonError::Supervisor(format!(
                "failed to write service descriptor {}: {e}",
                self.plist_path.display()
            ))
        })
    }

    fn bootout(&self) -> Result<(), String> {
        (self.runner)(&["bootout", &self.service_target()]).map(|_| ())
    }
}

impl Supervisor for LaunchdService {
    fn strategy(&self) -> Strategy {
        Strategy::Service
    }

    fn start(&self, launch: &Launch) -> Result<Option<u32>, DaemonError> {
        self.install_descriptor(launch)?;

        // A registration left behind by an earlier run would make bootstrap
        // fail with "service already loaded".
        if let Err(out) = self.bootout() {
            debug!(label = %self.label, output = %out, "no stale registration to boot out");
        }
        thread::sleep(SETTLE);

        let plist = self.plist_path.display().to_string();
        (self.runner)(&["bootstrap", &gui_domain(), &plist])
            .map_err(|out| DaemonError::Start(format!("launchctl bootstrap failed: {out}")))?;

        // Without RunAtLoad a bootstrapped job stays idle until kicked.
        (self.runner)(&["kickstart", "-k", &self.service_target()])
            .map_err(|out| DaemonError::Start(format!("launchctl kickstart failed: {out}")))?;
        info!(label = %self.label, "launched launchd agent");
        Ok(self.pid())
    }

    fn stop(&self) -> Result<(), DaemonError> {
        // Not being registered is the common case here, not a failure.
        match self.bootout() {
            Ok(()) => info!(label = %self.label, "booted out launchd agent"),
            Err(out) => debug!(label = %self.label, output = %out, "bootout failed"),
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        (self.runner)(&["list", &self.label])
            .ok()
            .and_then(|out| parse_list_pid(&out))
    }
}

/// Run launchctl; `Err` carries its combined stdout/stderr.
fn launchctl(args: &[&str]) -> Result<String, String> {
    let output = Command::new("launchctl")
        .args(args)
        .output()
        .map_err(|e| format!("failed to run launchctl: {e}"))?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let combined = combined.trim().to_string();
    if output.status.success() {
        Ok(combined)
    } else {
        Err(combined)
    }
}

#[cfg(unix)]
fn gui_domain() -> String {
    // SAFETY: getuid(2) cannot fail and has no preconditions.
    let uid = unsafe { libc::getuid() };
    format!("gui/{uid}")
}

#[cfg(not(unix))]
fn gui_domain() -> String {
    "gui/0".to_string()
}

/// Extract `"PID" = 123;` from `launchctl list <label>` output.
fn parse_list_pid(output: &str) -> Option<u32> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("\"PID\"")?;
        let value = rest.trim().strip_prefix('=')?.trim().trim_end_matches(';').trim();
        value.parse::<u32>().ok()
    })
}

/// Minimal XML escaping for plist string values.
fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the launchd descriptor for `launch`.
pub fn render_plist(label: &str, launch: &Launch) -> String {
    let log = xml_escape(&launch.log.display().to_string());
    let mut env = String::new();
    for (key, value) in &launch.env {
        env.push_str(&format!(
            "        <key>{}</key>\n        <string>{}</string>\n",
            xml_escape(key),
            xml_escape(value)
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>

    <key>ProgramArguments</key>
    <array>
        <string>{binary}</string>
    </array>

    <key>RunAtLoad</key>
    <false/>

    <key>KeepAlive</key>
    <false/>

    <key>StandardOutPath</key>
    <string>{log}</string>

    <key>StandardErrorPath</key>
    <string>{log}</string>

    <key>EnvironmentVariables</key>
    <dict>
{env}    </dict>
</dict>
</plist>
"#,
        label = xml_escape(label),
        binary = xml_escape(&launch.binary.display().to_string()),
    )
}
