//! HTTP clients against an in-process server: health probe, release index
//! and local API pass-through.

mod support;

use std::io::Read;

use support::{FakeServer, Request, Response};
use warden::api::{ConfigDomain, LocalApi};
use warden::errors::DaemonError;
use warden::health::{HealthCheck, HttpProbe};
use warden::release::{self, GithubReleases, ReleaseSource};

#[test]
fn probe_accepts_only_200_with_version() {
    let server = FakeServer::spawn(|req: &Request| match req.path.as_str() {
        "/ok" => Response::json(200, r#"{"version":"2.3.0","uptime":"4m 1s","blocked":2}"#),
        "/html" => Response::json(200, "<html>proxy login</html>"),
        "/down" => Response::json(502, r#"{"version":"2.3.0"}"#),
        _ => Response::not_found(),
    });

    let report = HttpProbe::new(server.url("/ok")).probe().unwrap();
    assert_eq!(report.version, "2.3.0");
    assert_eq!(report.uptime, "4m 1s");

    assert!(HttpProbe::new(server.url("/html")).probe().is_none());
    assert!(HttpProbe::new(server.url("/down")).probe().is_none());
}

#[test]
fn release_index_latest_tag_and_asset() {
    let server = FakeServer::spawn(|req: &Request| match req.path.as_str() {
        "/latest" => Response::json(200, r#"{"tag_name":"v2.3.0","assets":[]}"#),
        "/download/v2.3.0/agentguard-linux-amd64" => Response::bytes(b"ELF..."),
        _ => Response::not_found(),
    });
    let source = GithubReleases::new(server.url("/latest"), server.url("/download/"));

    assert_eq!(source.latest_tag().unwrap(), "v2.3.0");

    let mut body = Vec::new();
    source
        .open_asset("v2.3.0", "agentguard-linux-amd64")
        .unwrap()
        .read_to_end(&mut body)
        .unwrap();
    assert_eq!(body, b"ELF...");

    let err = source.open_asset("v9.9.9", "agentguard-linux-amd64").err().unwrap();
    assert_eq!(err.to_string(), "download returned HTTP 404");
}

#[test]
fn release_index_errors_are_distinct() {
    let server = FakeServer::spawn(|req: &Request| match req.path.as_str() {
        "/limited" => Response::json(403, r#"{"message":"API rate limit exceeded"}"#),
        "/garbage" => Response::json(200, "not json"),
        _ => Response::not_found(),
    });

    let err = GithubReleases::new(server.url("/limited"), server.url("/d"))
        .latest_tag()
        .unwrap_err();
    assert!(matches!(err, DaemonError::Release(_)));
    assert_eq!(err.to_string(), "release index returned HTTP 403");

    let err = GithubReleases::new(server.url("/garbage"), server.url("/d"))
        .latest_tag()
        .unwrap_err();
    assert!(err.to_string().starts_with("failed to parse release"));
}

#[test]
fn missing_self_release_is_none() {
    let server = FakeServer::spawn(|req: &Request| match req.path.as_str() {
        "/self" => Response::json(200, r#"{"tag_name":"v0.4.0"}"#),
        _ => Response::not_found(),
    });
    assert_eq!(
        release::latest_tag_or_none(&server.url("/self")).unwrap().as_deref(),
        Some("v0.4.0")
    );
    assert_eq!(release::latest_tag_or_none(&server.url("/none")).unwrap(), None);
}

#[test]
fn api_forwards_error_statuses_verbatim() {
    let server = FakeServer::spawn(|req: &Request| match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/api/approvals/42/deny") => Response::json(409, r#"{"error":"already resolved"}"#),
        ("GET", "/api/config/openclaw") => Response::json(200, r#"{"enabled":true}"#),
        _ => Response::not_found(),
    });
    let api = LocalApi::new(server.url(""));

    assert_eq!(api.handle_approval("42", "deny"), r#"{"error":"already resolved"}"#);
    assert_eq!(api.config(ConfigDomain::Openclaw), r#"{"enabled":true}"#);

    let requests = server.requests();
    let deny = requests.iter().find(|r| r.path == "/api/approvals/42/deny").unwrap();
    assert_eq!(deny.method, "POST");
    assert_eq!(deny.body, "");
}

#[test]
fn unreadable_api_body_is_reported_in_band() {
    // Larger than the client's body limit.
    let big = "x".repeat(11 * 1024 * 1024);
    let server = FakeServer::spawn(move |_: &Request| Response::json(200, &big));
    let api = LocalApi::new(server.url(""));

    let body: serde_json::Value = serde_json::from_str(&api.stats()).unwrap();
    let msg = body["error"].as_str().unwrap();
    assert!(msg.starts_with("read failed: "), "got {msg}");
}
