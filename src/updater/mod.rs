use std::sync::LazyLock;
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;

use crate::engine::models::{RemoteRelease, RemoteVersionInfo};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

// Matches the release segment in `/downloads/<version>/<binary>`.
static VERSION_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(\d+(?:\.\d+)+)/").expect("version segment pattern is valid")
});

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("upstream did not redirect (status {0})")]
    NotRedirected(StatusCode),
    #[error("redirect carried no usable Location header")]
    MissingLocation,
    #[error("unrecognized redirect location: {0}")]
    UnrecognizedLocation(String),
}

/// Finds the newest upstream release by reading the redirect issued for the
/// "latest" alias, without fetching any release listing.
#[derive(Clone, Debug)]
pub struct RemoteVersionResolver {
    client: Client,
    latest_url: String,
}

impl RemoteVersionResolver {
    pub fn new(latest_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(PROBE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            latest_url: latest_url.into(),
        })
    }

    pub fn latest_url(&self) -> &str {
        &self.latest_url
    }

    /// Latest release, or `(None, None)` when no redirect could be read.
    pub async fn get_remote_version(&self) -> RemoteVersionInfo {
        match self.probe().await {
            Ok(release) => {
                info!(
                    "remote version: latest is {} ({})",
                    release.version, release.download_url
                );
                RemoteVersionInfo::found(release)
            }
            Err(err @ (ProbeError::MissingLocation | ProbeError::UnrecognizedLocation(_))) => {
                warn!("remote version: {err}");
                RemoteVersionInfo::none()
            }
            Err(err) => {
                debug!("remote version: {err}");
                RemoteVersionInfo::none()
            }
        }
    }

    /// Issue the redirect probe and report exactly why it failed, if it did.
    pub async fn probe(&self) -> Result<RemoteRelease, ProbeError> {
        debug!("remote version: probing {}", self.latest_url);
        let response = self
            .client
            .get(&self.latest_url)
            .send()
            .await
            .map_err(ProbeError::Request)?;

        let status = response.status();
        if !status.is_redirection() {
            return Err(ProbeError::NotRedirected(status));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ProbeError::MissingLocation)?;

        // Absolute locations are handed on verbatim; relative ones are
        // resolved against the alias that issued them.
        let (parsed, download_url) = match Url::parse(location) {
            Ok(url) => (url, location.to_owned()),
            Err(_) => {
                let url = response
                    .url()
                    .join(location)
                    .map_err(|_| ProbeError::UnrecognizedLocation(location.to_owned()))?;
                let joined = url.to_string();
                (url, joined)
            }
        };
        let version = version_from_url(&parsed)
            .ok_or_else(|| ProbeError::UnrecognizedLocation(location.to_owned()))?;

        Ok(RemoteRelease {
            download_url,
            version,
        })
    }
}

/// Extract the release version embedded in a download location such as
/// `http://host/downloads/2021.03.14/youtube-dl.exe`.
pub fn parse_version_from_location(location: &str) -> Option<String> {
    match Url::parse(location) {
        Ok(url) => version_from_url(&url),
        Err(_) => capture_version(location),
    }
}

// Only the path is searched so dotted hosts never match.
fn version_from_url(url: &Url) -> Option<String> {
    capture_version(url.path())
}

fn capture_version(path: &str) -> Option<String> {
    VERSION_SEGMENT
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}
