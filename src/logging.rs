//! Diagnostic logging to stderr.
//!
//! stdout is reserved for command output (`--json` in particular), so all
//! `tracing` events go to stderr.

use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static INSTALLED: OnceLock<()> = OnceLock::new();

const DEFAULT_FILTER: &str = "warn";
const VERBOSE_FILTER: &str = "warden=debug,warn";

/// Pick the filter directive: `--verbose`, then `RUST_LOG`, then the
/// config file's `log.filter`, then warnings only.
pub fn filter_directive(verbose: bool, env: Option<&str>, configured: Option<&str>) -> String {
    if verbose {
        return VERBOSE_FILTER.to_string();
    }
    env.filter(|s| !s.trim().is_empty())
        .or(configured)
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init(verbose: bool, configured: Option<&str>) {
    INSTALLED.get_or_init(|| {
        let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let directive = filter_directive(verbose, env.as_deref(), configured);
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
            eprintln!("warning: invalid log filter '{directive}': {e}; using '{DEFAULT_FILTER}'");
            EnvFilter::new(DEFAULT_FILTER)
        });

        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .finish();
        // Someone else (a test harness) may already own the global default.
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_wins() {
        assert_eq!(
            filter_directive(true, Some("error"), Some("info")),
            VERBOSE_FILTER
        );
    }

    #[test]
    fn env_beats_config() {
        assert_eq!(filter_directive(false, Some("error"), Some("info")), "error");
        assert_eq!(filter_directive(false, Some("  "), Some("info")), "info");
    }

    #[test]
    fn default_is_warn() {
        assert_eq!(filter_directive(false, None, None), "warn");
    }

    #[test]
    fn init_is_idempotent() {
        init(false, None);
        init(true, Some("debug"));
    }
}
