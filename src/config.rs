//! Configuration file parsing, defaults, and merging.
//!
//! Configuration is loaded in layers (last wins):
//! 1. Built-in defaults
//! 2. Global config from `~/.warden/config.toml`
//! 3. An explicit file passed with `--config`
//!
//! Each layer only overrides fields it explicitly sets; absent fields
//! are left at their previous value.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Public config types (fully resolved, no Options)
// ---------------------------------------------------------------------------

/// Top-level configuration, fully resolved with defaults applied.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    pub agent: AgentConfig,
    pub release: ReleaseConfig,
    pub supervisor: SupervisorConfig,
    pub log: LogConfig,
}

/// Where the agent lives and how to reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Directory holding the binary, version marker, PID file and log.
    pub data_dir: PathBuf,
    /// Health endpoint probed to detect a live instance.
    pub health_url: String,
    /// Base URL of the agent's local REST API.
    pub api_base: String,
    /// Environment overrides applied to every launch.
    pub env: BTreeMap<String, String>,
    /// Stop an owned child when `warden run` exits.
    pub stop_on_exit: bool,
}

/// Release index settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseConfig {
    /// "Latest release" endpoint of the agent's release index.
    pub latest_url: String,
    /// Prefix for asset downloads: `<download_base>/<tag>/<asset>`.
    pub download_base: String,
    /// "Latest release" endpoint for warden itself.
    pub self_latest_url: String,
}

/// Process supervision settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// `"auto"`, `"detached"`, `"service"`, or `"child"`.
    pub strategy: String,
    /// launchd label used by the service strategy.
    pub service_label: String,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogConfig {
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    pub filter: Option<String>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for AgentConfig {
    fn default() -> Self {
        let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
        let mut env = BTreeMap::new();
        env.insert("AGENTGUARD_GATE_ENABLED".to_string(), "true".to_string());
        env.insert("AGENTGUARD_LLM_ENABLED".to_string(), "true".to_string());
        Self {
            data_dir: home.join(".agentguard").join("desktop"),
            health_url: "http://localhost:10180/agentguard/stats".to_string(),
            api_base: "http://localhost:10180".to_string(),
            env,
            stop_on_exit: true,
        }
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            latest_url: "https://api.github.com/repos/contail/AgentGuard/releases/latest"
                .to_string(),
            download_base: "https://github.com/contail/AgentGuard/releases/download".to_string(),
            self_latest_url: "https://api.github.com/repos/contail/warden/releases/latest"
                .to_string(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            strategy: "auto".to_string(),
            service_label: "com.agentguard.daemon".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Option-based overlay types (for partial deserialization)
// ---------------------------------------------------------------------------

/// Mirror of [`Config`] where every field is `Option`, so we can
/// deserialize a partial TOML file and overlay only the keys that are
/// present.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigOverlay {
    agent: Option<AgentOverlay>,
    release: Option<ReleaseOverlay>,
    supervisor: Option<SupervisorOverlay>,
    log: Option<LogOverlay>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AgentOverlay {
    data_dir: Option<PathBuf>,
    health_url: Option<String>,
    api_base: Option<String>,
    env: Option<BTreeMap<String, String>>,
    stop_on_exit: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ReleaseOverlay {
    latest_url: Option<String>,
    download_base: Option<String>,
    self_latest_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SupervisorOverlay {
    strategy: Option<String>,
    service_label: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct LogOverlay {
    filter: Option<String>,
}

// ---------------------------------------------------------------------------
// Merge helpers
// ---------------------------------------------------------------------------

impl Config {
    /// Apply an overlay on top of this config, replacing only the fields
    /// that are `Some` in the overlay.  Environment tables merge per key.
    fn apply_overlay(&mut self, overlay: ConfigOverlay) {
        if let Some(a) = overlay.agent {
            if let Some(v) = a.data_dir {
                self.agent.data_dir = expand_home(v);
            }
            if let Some(v) = a.health_url {
                self.agent.health_url = v;
            }
            if let Some(v) = a.api_base {
                self.agent.api_base = v.trim_end_matches('/').to_string();
            }
            if let Some(v) = a.env {
                self.agent.env.extend(v);
            }
            if let Some(v) = a.stop_on_exit {
                self.agent.stop_on_exit = v;
            }
        }
        if let Some(r) = overlay.release {
            if let Some(v) = r.latest_url {
                self.release.latest_url = v;
            }
            if let Some(v) = r.download_base {
                self.release.download_base = v.trim_end_matches('/').to_string();
            }
            if let Some(v) = r.self_latest_url {
                self.release.self_latest_url = v;
            }
        }
        if let Some(s) = overlay.supervisor {
            if let Some(v) = s.strategy {
                self.supervisor.strategy = v;
            }
            if let Some(v) = s.service_label {
                self.supervisor.service_label = v;
            }
        }
        if let Some(l) = overlay.log
            && let Some(v) = l.filter
        {
            self.log.filter = Some(v);
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Return the user's home directory.
pub(crate) fn home_dir() -> Option<PathBuf> {
    #[allow(deprecated)]
    std::env::home_dir()
}

/// Expand a leading `~/` in a configured path.
fn expand_home(path: PathBuf) -> PathBuf {
    match (path.strip_prefix("~"), home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path,
    }
}

/// Parse a TOML string into a [`ConfigOverlay`], producing a clear error
/// message on malformed input.
fn parse_overlay(contents: &str, path: &Path) -> Result<ConfigOverlay> {
    toml::from_str(contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Try to read a config file and parse it as an overlay.
/// Returns `Ok(None)` if the file does not exist.
fn load_overlay(path: &Path) -> Result<Option<ConfigOverlay>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let overlay = parse_overlay(&contents, path)?;
            Ok(Some(overlay))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!(
            "failed to read config file {}: {}",
            path.display(),
            e
        )),
    }
}

impl Config {
    /// Load configuration by merging layers:
    /// defaults -> global (`~/.warden/config.toml`) -> `explicit`.
    ///
    /// An explicit path that does not exist is an error; a missing global
    /// file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let global_dir = home_dir().map(|h| h.join(".warden"));
        Self::load_with_global_dir(global_dir.as_deref(), explicit)
    }

    /// Internal: load config with an explicit global config directory.
    ///
    /// This allows tests to supply a temporary directory instead of the
    /// real `~/.warden` without mutating environment variables.
    fn load_with_global_dir(global_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Config> {
        let mut config = Config::default();

        if let Some(dir) = global_dir {
            let global_path = dir.join("config.toml");
            if let Some(overlay) = load_overlay(&global_path)? {
                config.apply_overlay(overlay);
            }
        }

        if let Some(path) = explicit {
            let overlay = load_overlay(path)?
                .with_context(|| format!("config file not found: {}", path.display()))?;
            config.apply_overlay(overlay);
        }

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
