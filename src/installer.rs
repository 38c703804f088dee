//! Download and atomic installation of the agent binary.
//!
//! A download is staged in a temporary file inside the data directory and
//! renamed over the live binary only once it is completely written. The
//! version marker is written after the rename, so a failure at any stage
//! leaves the previously installed binary and marker exactly as they were.

use std::fs;
use std::io;

use tracing::{info, warn};

use crate::errors::DaemonError;
use crate::layout::Layout;
use crate::release::{self, ReleaseSource};

/// Installs release assets into a [`Layout`].
pub struct Installer {
    layout: Layout,
    source: Box<dyn ReleaseSource>,
    /// Asset for this host; `None` on platforms without a published build.
    asset: Option<String>,
}

impl Installer {
    /// Create an installer for the running host's platform.
    pub fn new(layout: Layout, source: Box<dyn ReleaseSource>) -> Self {
        let asset = release::current_platform_asset().ok().map(str::to_string);
        Self {
            layout,
            source,
            asset,
        }
    }

    /// Override the platform asset name (`None` simulates an unsupported
    /// platform).
    pub fn with_asset(mut self, asset: Option<&str>) -> Self {
        self.asset = asset.map(str::to_string);
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Latest tag published by the release source.
    pub fn latest_tag(&self) -> Result<String, DaemonError> {
        self.source.latest_tag()
    }

    /// Version recorded in the marker, or an empty string when nothing has
    /// been installed (or the marker is unreadable).
    pub fn local_version(&self) -> String {
        fs::read_to_string(self.layout.version_path())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    /// Download `tag` and install it over the current binary.
    ///
    /// Returns the installed version (the tag without its `v` prefix).
    pub fn download(&self, tag: &str) -> Result<String, DaemonError> {
        let Some(asset) = self.asset.as_deref() else {
            return Err(DaemonError::UnsupportedPlatform {
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            });
        };

        let tag = release::normalize_tag(tag);
        let version = release::tag_version(&tag).to_string();
        self.layout
            .ensure()
            .map_err(|e| DaemonError::Install(format!("{e:#}")))?;

        let mut body = self.source.open_asset(&tag, asset)?;

        // Staged in the destination directory so the final rename never
        // crosses a filesystem boundary. Dropping it on any error path
        // deletes the partial file.
        let mut staged = tempfile::Builder::new()
            .prefix(".agentguard-")
            .suffix(".tmp")
            .tempfile_in(self.layout.data_dir())
            .map_err(|e| DaemonError::Install(format!("failed to create temp file: {e}")))?;

        io::copy(&mut body, staged.as_file_mut())
            .map_err(|e| DaemonError::Install(format!("failed to write binary: {e}")))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| DaemonError::Install(format!("failed to write binary: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(staged.path(), fs::Permissions::from_mode(0o755))
                .map_err(|e| DaemonError::Install(format!("failed to set permissions: {e}")))?;
        }

        let dest = self.layout.binary_path();
        staged
            .persist(&dest)
            .map_err(|e| DaemonError::Install(format!("failed to install binary: {}", e.error)))?;

        if let Err(e) = fs::write(self.layout.version_path(), &version) {
            warn!(error = %e, "installed binary but could not write version marker");
        }
        info!(%version, path = %dest.display(), "installed agent binary");
        Ok(version)
    }

    /// Make sure a binary is installed, downloading the latest release on
    /// first launch. Returns the local version.
    ///
    /// An existing binary is adopted as-is without touching the network.
    pub fn ensure_binary(&self) -> Result<String, DaemonError> {
        if self.layout.binary_path().exists() {
            return Ok(self.local_version());
        }

        let tag = self.source.latest_tag().map_err(|e| {
            DaemonError::Release(format!("no local binary and cannot fetch latest: {e}"))
        })?;
        info!(%tag, "no local binary; bootstrapping latest release");
        self.download(&tag)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
