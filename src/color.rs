//! ANSI styling of human-readable status output.
//!
//! Color is used only when stdout is a terminal, and is overridden by the
//! usual environment conventions: `NO_COLOR` (any value) disables it,
//! `CLICOLOR_FORCE=1` forces it, `CLICOLOR=0` disables it.

use std::io::IsTerminal;

use crate::types::DaemonState;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";

/// Resolve from the process environment and stdout.
pub fn resolve_color() -> bool {
    resolve_color_inner(
        std::env::var_os("NO_COLOR").is_some(),
        std::env::var("CLICOLOR_FORCE").ok().as_deref(),
        std::env::var("CLICOLOR").ok().as_deref(),
        std::io::stdout().is_terminal(),
    )
}

pub fn resolve_color_inner(
    no_color: bool,
    clicolor_force: Option<&str>,
    clicolor: Option<&str>,
    is_tty: bool,
) -> bool {
    if no_color {
        return false;
    }
    if clicolor_force == Some("1") {
        return true;
    }
    if clicolor == Some("0") {
        return false;
    }
    is_tty
}

/// Escape sequence for a lifecycle state.
pub fn state(state: DaemonState) -> &'static str {
    match state {
        DaemonState::Running => GREEN,
        DaemonState::Starting => YELLOW,
        DaemonState::Error => RED,
        DaemonState::Stopped => DIM,
    }
}
