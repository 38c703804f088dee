//! Blocking HTTP plumbing shared by the prober, release locator, installer
//! and local API pass-through.
//!
//! Every outbound call carries a fixed timeout; nothing is allowed to block
//! indefinitely.

use std::time::Duration;

use ureq::Agent;

/// Health probes against the local endpoint.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Local REST API pass-through.
pub const API_TIMEOUT: Duration = Duration::from_secs(5);
/// Release index metadata.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(15);
/// Binary downloads.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Sent on every request; the GitHub API rejects anonymous agents.
pub const USER_AGENT: &str = concat!("warden/", env!("CARGO_PKG_VERSION"));

/// Build an agent with a global timeout that reports non-2xx statuses as
/// responses rather than errors, so callers can map them themselves.
pub fn agent(timeout: Duration) -> Agent {
    Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}
