//! Release index queries and platform asset resolution.
//!
//! The agent is published as one raw executable per platform on a
//! GitHub-style release index. This module answers two questions: what is
//! the latest tag, and where do I download the asset for this machine.

use std::io::Read;

use serde::Deserialize;
use tracing::debug;
use ureq::Agent;

use crate::errors::DaemonError;
use crate::http;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Subset of the release index "latest" payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
}

// ---------------------------------------------------------------------------
// Platform mapping
// ---------------------------------------------------------------------------

/// Map an (OS, architecture) pair, as spelled by `std::env::consts`, to the
/// published asset name. `None` means no build exists for this platform.
pub fn platform_asset_name(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("macos", "aarch64") => Some("agentguard-mac-arm64"),
        ("macos", "x86_64") => Some("agentguard-mac-amd64"),
        ("linux", "x86_64") => Some("agentguard-linux-amd64"),
        ("windows", "x86_64") => Some("agentguard-windows-amd64.exe"),
        _ => None,
    }
}

/// Asset name for the running host.
pub fn current_platform_asset() -> Result<&'static str, DaemonError> {
    let (os, arch) = (std::env::consts::OS, std::env::consts::ARCH);
    platform_asset_name(os, arch).ok_or_else(|| DaemonError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Version helpers
// ---------------------------------------------------------------------------

/// Ensure a tag carries the `v` prefix used by the release index.
pub fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.starts_with('v') {
        tag.to_string()
    } else {
        format!("v{tag}")
    }
}

/// Version string as stored in the marker: the tag without its `v`.
pub fn tag_version(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix('v').unwrap_or(tag)
}

/// Whether `remote_tag` differs from the locally installed `local` version.
///
/// An unknown local version (nothing installed) or an empty remote tag never
/// counts as an update.
pub fn update_available(local: &str, remote_tag: &str) -> bool {
    let local = local.trim();
    let remote_tag = remote_tag.trim();
    !local.is_empty() && !remote_tag.is_empty() && normalize_tag(local) != normalize_tag(remote_tag)
}

/// `<download_base>/<tag>/<asset>`.
pub fn asset_url(download_base: &str, tag: &str, asset: &str) -> String {
    format!("{}/{}/{}", download_base.trim_end_matches('/'), tag, asset)
}

// ---------------------------------------------------------------------------
// Release source
// ---------------------------------------------------------------------------

/// Where releases come from. The installer only talks to this trait.
pub trait ReleaseSource: Send + Sync {
    /// Latest published tag, as spelled by the index (usually `v`-prefixed).
    fn latest_tag(&self) -> Result<String, DaemonError>;

    /// Open a stream over the raw asset for `tag` (already `v`-prefixed).
    fn open_asset(&self, tag: &str, asset: &str) -> Result<Box<dyn Read>, DaemonError>;
}

/// GitHub-style release index reached over HTTP.
pub struct GithubReleases {
    meta: Agent,
    download: Agent,
    latest_url: String,
    download_base: String,
}

impl GithubReleases {
    pub fn new(latest_url: impl Into<String>, download_base: impl Into<String>) -> Self {
        Self {
            meta: http::agent(http::RELEASE_TIMEOUT),
            download: http::agent(http::DOWNLOAD_TIMEOUT),
            latest_url: latest_url.into(),
            download_base: download_base.into(),
        }
    }
}

impl ReleaseSource for GithubReleases {
    fn latest_tag(&self) -> Result<String, DaemonError> {
        fetch_release(&self.meta, &self.latest_url).map(|r| r.tag_name)
    }

    fn open_asset(&self, tag: &str, asset: &str) -> Result<Box<dyn Read>, DaemonError> {
        let url = asset_url(&self.download_base, tag, asset);
        debug!(%url, "downloading release asset");
        let resp = self
            .download
            .get(&url)
            .header("User-Agent", http::USER_AGENT)
            .call()
            .map_err(|e| DaemonError::Install(format!("download failed: {e}")))?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(DaemonError::Install(format!(
                "download returned HTTP {status}"
            )));
        }
        Ok(Box::new(resp.into_body().into_reader()))
    }
}

/// GET a "latest release" endpoint and decode it.
fn fetch_release(agent: &Agent, url: &str) -> Result<Release, DaemonError> {
    let mut resp = agent
        .get(url)
        .header("User-Agent", http::USER_AGENT)
        .header("Accept", "application/vnd.github+json")
        .call()
        .map_err(|e| DaemonError::Release(format!("failed to check releases: {e}")))?;

    let status = resp.status().as_u16();
    if status != 200 {
        return Err(DaemonError::Release(format!(
            "release index returned HTTP {status}"
        )));
    }

    resp.body_mut()
        .read_json::<Release>()
        .map_err(|e| DaemonError::Release(format!("failed to parse release: {e}")))
}

/// Latest tag at `url`, treating a 404 (no release published yet) as `None`.
///
/// Used for the supervisor's own version check, where a missing release is
/// normal rather than an error.
pub fn latest_tag_or_none(url: &str) -> Result<Option<String>, DaemonError> {
    let agent = http::agent(http::RELEASE_TIMEOUT);
    let mut resp = agent
        .get(url)
        .header("User-Agent", http::USER_AGENT)
        .call()
        .map_err(|e| DaemonError::Release(format!("failed to check releases: {e}")))?;

    match resp.status().as_u16() {
        200 => {}
        404 => return Ok(None),
        status => {
            return Err(DaemonError::Release(format!(
                "release index returned HTTP {status}"
            )));
        }
    }

    let release = resp
        .body_mut()
        .read_json::<Release>()
        .map_err(|e| DaemonError::Release(format!("failed to parse release: {e}")))?;
    Ok(Some(release.tag_name).filter(|t| !t.is_empty()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_platforms_map_to_assets() {
        assert_eq!(platform_asset_name("macos", "aarch64"), Some("agentguard-mac-arm64"));
        assert_eq!(platform_asset_name("macos", "x86_64"), Some("agentguard-mac-amd64"));
        assert_eq!(platform_asset_name("linux", "x86_64"), Some("agentguard-linux-amd64"));
        assert_eq!(
            platform_asset_name("windows", "x86_64"),
            Some("agentguard-windows-amd64.exe")
        );
    }

    #[test]
    fn unknown_platforms_have_no_asset() {
        assert_eq!(platform_asset_name("linux", "aarch64"), None);
        assert_eq!(platform_asset_name("freebsd", "x86_64"), None);
        assert_eq!(platform_asset_name("", ""), None);
    }

    #[test]
    fn normalize_adds_prefix_once() {
        assert_eq!(normalize_tag("2.3.0"), "v2.3.0");
        assert_eq!(normalize_tag("v2.3.0"), "v2.3.0");
        assert_eq!(normalize_tag(" 2.3.0\n"), "v2.3.0");
    }

    #[test]
    fn tag_version_strips_prefix() {
        assert_eq!(tag_version("v2.3.0"), "2.3.0");
        assert_eq!(tag_version("2.3.0"), "2.3.0");
    }

    #[test]
    fn same_version_is_not_an_update() {
        assert!(!update_available("1.0.0", "v1.0.0"));
        assert!(!update_available("1.0.0\n", "v1.0.0"));
    }

    #[test]
    fn different_version_is_an_update() {
        assert!(update_available("1.0.0", "v1.0.1"));
    }

    #[test]
    fn unknown_sides_are_never_updates() {
        assert!(!update_available("", "v1.0.1"));
        assert!(!update_available("1.0.0", ""));
    }

    #[test]
    fn asset_url_joins_segments() {
        assert_eq!(
            asset_url("https://example.invalid/download/", "v2.3.0", "agentguard-linux-amd64"),
            "https://example.invalid/download/v2.3.0/agentguard-linux-amd64"
        );
    }

    #[test]
    fn release_payload_parses() {
        let release: Release = serde_json::from_str(
            r#"{
                "tag_name": "v2.3.0",
                "name": "2.3.0",
                "assets": [
                    {"name": "agentguard-linux-amd64",
                     "browser_download_url": "https://example.invalid/a",
                     "size": 1024}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(release.tag_name, "v2.3.0");
        assert_eq!(release.assets.len(), 1);
        assert_eq!(release.assets[0].name, "agentguard-linux-amd64");
    }
}
