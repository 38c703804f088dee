//! Version comparison for `warden check-update`.
//!
//! Two independent checks: the installed agent against the latest agent
//! release, and warden itself against its own release index. A failure of
//! one is reported in its `*_error` field and never hides the other.

use serde::Serialize;

use crate::installer::Installer;
use crate::release;

/// Version of this supervisor, compared against its release index.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_local: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_update_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_error: Option<String>,

    pub app_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_update_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_error: Option<String>,
}

/// Agent half of the report.
pub fn check_core(installer: &Installer, report: &mut UpdateReport) {
    let local = installer.local_version();
    match installer.latest_tag() {
        Ok(remote) => {
            report.core_update_available = Some(release::update_available(&local, &remote));
            report.core_local = Some(local);
            report.core_remote = Some(remote);
        }
        Err(e) => report.core_error = Some(e.to_string()),
    }
}

/// Supervisor half of the report. No published release is not an error.
pub fn check_app(latest: Result<Option<String>, String>, report: &mut UpdateReport) {
    report.app_version = APP_VERSION.to_string();
    match latest {
        Ok(Some(remote)) => {
            report.app_update_available = Some(release::update_available(APP_VERSION, &remote));
            report.app_remote = Some(remote);
        }
        Ok(None) => {
            report.app_update_available = Some(false);
        }
        Err(e) => report.app_error = Some(e),
    }
}

/// Run both checks against the network.
pub fn check(installer: &Installer, self_latest_url: &str) -> UpdateReport {
    let mut report = UpdateReport::default();
    check_core(installer, &mut report);
    let latest = release::latest_tag_or_none(self_latest_url).map_err(|e| e.to_string());
    check_app(latest, &mut report);
    report
}
