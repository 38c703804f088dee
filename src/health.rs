//! Health probing of the local agent endpoint.
//!
//! A probe is a single bounded GET. It never mutates anything: the
//! lifecycle manager decides what a successful or failed probe means for
//! its record.

use serde::Deserialize;
use tracing::debug;
use ureq::Agent;

use crate::http;

/// Minimal envelope served by the agent's stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthReport {
    pub version: String,
    #[serde(default)]
    pub uptime: String,
}

/// Anything that can tell whether a healthy agent is reachable.
pub trait HealthCheck: Send + Sync {
    /// `Some` only for a 200 response with a parseable body.
    fn probe(&self) -> Option<HealthReport>;
}

/// Probes an HTTP endpoint with a 2-second budget.
pub struct HttpProbe {
    agent: Agent,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            agent: http::agent(http::PROBE_TIMEOUT),
            url: url.into(),
        }
    }
}

impl HealthCheck for HttpProbe {
    fn probe(&self) -> Option<HealthReport> {
        let mut resp = match self
            .agent
            .get(&self.url)
            .header("User-Agent", http::USER_AGENT)
            .call()
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!(url = %self.url, error = %e, "health probe unreachable");
                return None;
            }
        };

        let status = resp.status().as_u16();
        if status != 200 {
            debug!(url = %self.url, status, "health probe returned non-200");
            return None;
        }

        match resp.body_mut().read_json::<HealthReport>() {
            Ok(report) => Some(report),
            Err(e) => {
                debug!(url = %self.url, error = %e, "health probe body unparseable");
                None
            }
        }
    }
}
