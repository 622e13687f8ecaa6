use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::env;

pub const DEFAULT_RELEASE_HOST: &str = "https://yt-dl.org";

/// Persisted record of the installed binary's version.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionRecord {
    pub version: String,
}

/// Upstream platform convention: which "latest" alias to probe and what the
/// binary is called on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlatformTarget {
    Windows,
    MacOs,
    Linux,
}

impl PlatformTarget {
    /// Platform the updater was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            PlatformTarget::Windows
        } else if cfg!(target_os = "macos") {
            PlatformTarget::MacOs
        } else {
            PlatformTarget::Linux
        }
    }

    pub fn binary_name(self) -> &'static str {
        match self {
            PlatformTarget::Windows => "youtube-dl.exe",
            PlatformTarget::MacOs | PlatformTarget::Linux => "youtube-dl",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PlatformTarget::Windows => "windows",
            PlatformTarget::MacOs => "macos",
            PlatformTarget::Linux => "linux",
        }
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PlatformTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "windows" | "win32" => Ok(PlatformTarget::Windows),
            "macos" | "darwin" | "mac" => Ok(PlatformTarget::MacOs),
            "linux" => Ok(PlatformTarget::Linux),
            other => Err(format!(
                "unknown platform '{other}' (expected windows, macos or linux)"
            )),
        }
    }
}

/// A release discovered upstream. Both fields are always present together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRelease {
    pub download_url: String,
    pub version: String,
}

/// Result of a remote version lookup: either a full release or nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteVersionInfo {
    release: Option<RemoteRelease>,
}

impl RemoteVersionInfo {
    pub fn none() -> Self {
        Self { release: None }
    }

    pub fn found(release: RemoteRelease) -> Self {
        Self {
            release: Some(release),
        }
    }

    pub fn download_url(&self) -> Option<&str> {
        self.release.as_ref().map(|r| r.download_url.as_str())
    }

    pub fn version(&self) -> Option<&str> {
        self.release.as_ref().map(|r| r.version.as_str())
    }

    /// `(download_url, version)` view of the lookup.
    pub fn as_pair(&self) -> (Option<&str>, Option<&str>) {
        (self.download_url(), self.version())
    }

    pub fn into_release(self) -> Option<RemoteRelease> {
        self.release
    }
}

/// Where the managed binary and its version record live, and which upstream
/// convention applies.
#[derive(Clone, Debug)]
pub struct UpdaterConfig {
    pub platform: PlatformTarget,
    pub binary_path: PathBuf,
    pub version_record_path: PathBuf,
    pub release_host: String,
}

impl UpdaterConfig {
    pub fn for_platform(platform: PlatformTarget) -> Self {
        Self {
            platform,
            binary_path: env::bin_dir().join(platform.binary_name()),
            version_record_path: env::version_record_path(),
            release_host: DEFAULT_RELEASE_HOST.to_owned(),
        }
    }

    pub fn with_binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = path.into();
        self
    }

    pub fn with_version_record_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.version_record_path = path.into();
        self
    }

    pub fn with_release_host(mut self, host: impl Into<String>) -> Self {
        self.release_host = host.into();
        self
    }

    /// The upstream alias that redirects to the newest release.
    pub fn latest_alias_url(&self) -> String {
        format!(
            "{}/downloads/latest/{}",
            self.release_host.trim_end_matches('/'),
            self.platform.binary_name()
        )
    }
}
