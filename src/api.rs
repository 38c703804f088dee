//! Pass-through client for the agent's local REST API.
//!
//! Bodies are forwarded verbatim in both directions; the agent owns their
//! schema. Only a failure to reach the agent at all is turned into a
//! synthetic `{"error": "connection failed: ..."}` document.

use serde_json::json;
use tracing::debug;
use ureq::Agent;

use crate::http;

/// Config sections exposed by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigDomain {
    Agentguard,
    Openclaw,
}

impl ConfigDomain {
    fn path(self) -> &'static str {
        match self {
            ConfigDomain::Agentguard => "/api/config/agentguard",
            ConfigDomain::Openclaw => "/api/config/openclaw",
        }
    }
}

pub struct LocalApi {
    agent: Agent,
    base: String,
}

impl LocalApi {
    pub fn new(base: impl Into<String>) -> Self {
        let base: String = base.into();
        Self {
            agent: http::agent(http::API_TIMEOUT),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// GET `path`, returning the response body whatever its status.
    pub fn get(&self, path: &str) -> String {
        let url = self.url(path);
        debug!(%url, "GET");
        let result = self
            .agent
            .get(&url)
            .header("User-Agent", http::USER_AGENT)
            .call();
        match result {
            Ok(mut resp) => resp
                .body_mut()
                .read_to_string()
                .unwrap_or_else(|e| read_failed(&e)),
            Err(e) => connection_failed(&e),
        }
    }

    /// POST `body` (JSON, may be empty) to `path`.
    pub fn post(&self, path: &str, body: &str) -> String {
        let url = self.url(path);
        debug!(%url, bytes = body.len(), "POST");
        let req = self
            .agent
            .post(&url)
            .header("User-Agent", http::USER_AGENT);
        let result = if body.is_empty() {
            req.send_empty()
        } else {
            req.header("Content-Type", "application/json").send(body)
        };
        match result {
            Ok(mut resp) => resp
                .body_mut()
                .read_to_string()
                .unwrap_or_else(|e| read_failed(&e)),
            Err(e) => connection_failed(&e),
        }
    }

    pub fn stats(&self) -> String {
        self.get("/agentguard/stats")
    }

    pub fn config(&self, domain: ConfigDomain) -> String {
        self.get(domain.path())
    }

    pub fn save_config(&self, domain: ConfigDomain, body: &str) -> String {
        self.post(domain.path(), body)
    }

    pub fn approvals(&self) -> String {
        self.get("/api/approvals")
    }

    /// Resolve a pending approval, e.g. `approve` or `deny`.
    pub fn handle_approval(&self, id: &str, action: &str) -> String {
        self.post(&format!("/api/approvals/{id}/{action}"), "")
    }

    pub fn mcp_policy(&self) -> String {
        self.get("/api/mcp/policy")
    }

    pub fn save_mcp_policy(&self, body: &str) -> String {
        self.post("/api/mcp/policy", body)
    }

    pub fn mcp_audit(&self) -> String {
        self.get("/api/mcp/audit")
    }

    pub fn mcp_clients(&self) -> String {
        self.get("/api/mcp/clients")
    }

    /// Route an MCP client through the agent, or undo that with `undo`.
    pub fn wrap_mcp_client(&self, client: &str, undo: bool) -> String {
        let body = json!({ "client": client, "undo": undo }).to_string();
        self.post("/api/mcp/wrap", &body)
    }
}

fn connection_failed(e: &ureq::Error) -> String {
    debug!(error = %e, "local API unreachable");
    json!({ "error": format!("connection failed: {e}") }).to_string()
}

/// The request went through but its body could not be read.
fn read_failed(e: &ureq::Error) -> String {
    debug!(error = %e, "failed to read local API response");
    json!({ "error": format!("read failed: {e}") }).to_string()
}
