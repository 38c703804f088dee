//! Output formatting: aligned human-readable text (default) and JSON
//! (`--json`).
//!
//! All command results flow through a [`Formatter`] which writes to an
//! arbitrary [`std::io::Write`] destination (typically stdout). Hints and
//! errors always go to stderr via [`print_hint`] and [`print_error`].

use std::io::{self, Write};

use serde::Serialize;

use crate::color;
use crate::types::{DaemonState, DaemonStatus};
use crate::update_check::UpdateReport;

/// Acknowledgement printed by lifecycle commands in JSON mode.
#[derive(Debug, Clone, Serialize)]
pub struct Ack<'a> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<&'a str>,
}

pub struct Formatter<W: Write> {
    writer: W,
    json: bool,
    color: bool,
}

impl<W: Write> Formatter<W> {
    /// * `json`  - emit one JSON document per result instead of text.
    /// * `color` - emit ANSI styling in text mode.
    pub fn new(writer: W, json: bool, color: bool) -> Self {
        Self {
            writer,
            json,
            color,
        }
    }

    fn write_json<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        let line = serde_json::to_string(value).map_err(io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    fn write_field(&mut self, label: &str, value: &str) -> io::Result<()> {
        let label = format!("{label}:");
        if self.color {
            writeln!(self.writer, "{}{label:<9}{} {value}", color::DIM, color::RESET)
        } else {
            writeln!(self.writer, "{label:<9} {value}")
        }
    }

    /// Render a status snapshot.
    pub fn format_status(&mut self, status: &DaemonStatus) -> io::Result<()> {
        if self.json {
            return self.write_json(status);
        }

        let owner = match (status.state, status.managed) {
            (DaemonState::Running, true) => " (started by warden)",
            (DaemonState::Running, false) => " (external instance)",
            _ => "",
        };
        let state = if self.color {
            format!(
                "{}{}{}{}{owner}",
                color::BOLD,
                color::state(status.state),
                status.state,
                color::RESET
            )
        } else {
            format!("{}{owner}", status.state)
        };
        self.write_field("state", &state)?;

        let version = if status.version.is_empty() {
            "unknown"
        } else {
            &status.version
        };
        self.write_field("version", version)?;
        if status.pid != 0 {
            self.write_field("pid", &status.pid.to_string())?;
        }
        if !status.uptime.is_empty() {
            self.write_field("uptime", &status.uptime)?;
        }
        if !status.error.is_empty() {
            self.write_field("error", &status.error)?;
        }
        Ok(())
    }

    /// Acknowledge a lifecycle command: `message` in text mode,
    /// `{"status":"ok"}` (plus the installed version) in JSON mode.
    pub fn format_ack(&mut self, message: &str, version: Option<&str>) -> io::Result<()> {
        if self.json {
            self.write_json(&Ack {
                status: "ok",
                version,
            })
        } else {
            writeln!(self.writer, "{message}")
        }
    }

    pub fn format_update_report(&mut self, report: &UpdateReport) -> io::Result<()> {
        if self.json {
            return self.write_json(report);
        }

        match &report.core_error {
            Some(e) => self.write_field("agent", &format!("check failed: {e}"))?,
            None => {
                let local = report
                    .core_local
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .unwrap_or("not installed");
                let remote = report.core_remote.as_deref().unwrap_or("?");
                let line = if report.core_update_available == Some(true) {
                    format!("{local} -> {remote} available")
                } else {
                    format!("{local} (latest {remote})")
                };
                self.write_field("agent", &line)?;
            }
        }

        match &report.app_error {
            Some(e) => self.write_field("warden", &format!("check failed: {e}")),
            None => {
                let line = match (&report.app_remote, report.app_update_available) {
                    (Some(remote), Some(true)) => {
                        format!("{} -> {remote} available", report.app_version)
                    }
                    (Some(remote), _) => format!("{} (latest {remote})", report.app_version),
                    (None, _) => format!("{} (no published release)", report.app_version),
                };
                self.write_field("warden", &line)
            }
        }
    }

    /// Print a local API response. JSON mode forwards the body untouched;
    /// text mode pretty-prints it when it is JSON.
    pub fn format_api_body(&mut self, body: &str) -> io::Result<()> {
        let body = body.trim_end();
        if !self.json
            && let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
            && let Ok(pretty) = serde_json::to_string_pretty(&value)
        {
            return writeln!(self.writer, "{pretty}");
        }
        writeln!(self.writer, "{body}")
    }
}

// ---------------------------------------------------------------------------
// Stderr helpers
// ---------------------------------------------------------------------------

/// Print a hint message to stderr (suppressed when `json` is true).
pub fn print_hint(msg: &str, json: bool) {
    if !json {
        eprintln!("hint: {msg}");
    }
}

/// Print an error message to stderr.
pub fn print_error(msg: &str) {
    eprintln!("error: {msg}");
}

/// Report a [`WardenError`](crate::errors::WardenError) on stderr and
/// return the process exit code.
pub fn format_error(err: &crate::errors::WardenError, json: bool) -> i32 {
    print_error(&format!("{err}"));
    if let Some(hint) = err.hint() {
        print_hint(hint, json);
    }
    err.exit_code()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn render<F>(json: bool, f: F) -> String
    where
        F: FnOnce(&mut Formatter<&mut Vec<u8>>) -> io::Result<()>,
    {
        let mut buf = Vec::new();
        {
            let mut fmt = Formatter::new(&mut buf, json, false);
            f(&mut fmt).unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    fn running() -> DaemonStatus {
        DaemonStatus {
            state: DaemonState::Running,
            version: "2.3.0".into(),
            pid: 4242,
            uptime: "1m 2s".into(),
            error: String::new(),
            managed: true,
        }
    }

    #[test]
    fn status_text_format() {
        let out = render(false, |fmt| fmt.format_status(&running()));
        assert_eq!(
            out,
            "state:    running (started by warden)\n\
             version:  2.3.0\n\
             pid:      4242\n\
             uptime:   1m 2s\n"
        );
    }

    #[test]
    fn status_text_omits_unknowns() {
        let status = DaemonStatus {
            state: DaemonState::Error,
            error: "daemon started but not responding after 5s".into(),
            ..DaemonStatus::default()
        };
        let out = render(false, |fmt| fmt.format_status(&status));
        assert_eq!(
            out,
            "state:    error\n\
             version:  unknown\n\
             error:    daemon started but not responding after 5s\n"
        );
    }

    #[test]
    fn status_json_format() {
        let out = render(true, |fmt| fmt.format_status(&running()));
        let v: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(v["state"], "running");
        assert_eq!(v["version"], "2.3.0");
        assert_eq!(v["pid"], 4242);
        assert_eq!(v["uptime"], "1m 2s");
        assert_eq!(v["managed"], true);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn status_json_external_has_zero_pid() {
        let status = DaemonStatus {
            state: DaemonState::Running,
            version: "1.9.0".into(),
            ..DaemonStatus::default()
        };
        let out = render(true, |fmt| fmt.format_status(&status));
        let v: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(v["pid"], 0);
        assert_eq!(v["uptime"], "");
        assert_eq!(v["managed"], false);
    }

    #[test]
    fn ack_formats() {
        assert_eq!(
            render(false, |fmt| fmt.format_ack("agent started", None)),
            "agent started\n"
        );
        assert_eq!(
            render(true, |fmt| fmt.format_ack("agent started", None)),
            "{\"status\":\"ok\"}\n"
        );
        assert_eq!(
            render(true, |fmt| fmt.format_ack("updated", Some("v2.3.0"))),
            "{\"status\":\"ok\",\"version\":\"v2.3.0\"}\n"
        );
    }

    #[test]
    fn update_report_text() {
        let report = UpdateReport {
            core_local: Some("1.0.0".into()),
            core_remote: Some("v1.0.1".into()),
            core_update_available: Some(true),
            app_version: "0.3.0".into(),
            app_error: Some("release index returned HTTP 500".into()),
            ..UpdateReport::default()
        };
        let out = render(false, |fmt| fmt.format_update_report(&report));
        assert_eq!(
            out,
            "agent:    1.0.0 -> v1.0.1 available\n\
             warden:   check failed: release index returned HTTP 500\n"
        );
    }

    #[test]
    fn update_report_text_not_installed() {
        let report = UpdateReport {
            core_local: Some(String::new()),
            core_remote: Some("v1.0.1".into()),
            core_update_available: Some(false),
            app_version: "0.3.0".into(),
            app_update_available: Some(false),
            ..UpdateReport::default()
        };
        let out = render(false, |fmt| fmt.format_update_report(&report));
        assert_eq!(
            out,
            "agent:    not installed (latest v1.0.1)\n\
             warden:   0.3.0 (no published release)\n"
        );
    }

    #[test]
    fn api_body_json_mode_is_verbatim() {
        let body = "{\"b\":1,\"a\":2}\n";
        assert_eq!(
            render(true, |fmt| fmt.format_api_body(body)),
            "{\"b\":1,\"a\":2}\n"
        );
    }

    #[test]
    fn api_body_text_mode_pretty_prints_json() {
        let out = render(false, |fmt| fmt.format_api_body("{\"pending\":[]}"));
        assert_eq!(out, "{\n  \"pending\": []\n}\n");
    }

    #[test]
    fn api_body_text_mode_passes_non_json() {
        let out = render(false, |fmt| fmt.format_api_body("404 page not found"));
        assert_eq!(out, "404 page not found\n");
    }
}
