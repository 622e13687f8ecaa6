use log::{debug, info};
use tokio::sync::{Mutex, mpsc};

use crate::engine::models::UpdaterConfig;
use crate::engine::state::{CheckOutcome, UpdateNotice};
use crate::networking::{BinaryFetcher, FetchError, ProgressCallback};
use crate::storage::VersionStore;
use crate::updater::RemoteVersionResolver;

pub mod models;
pub mod state;

/// Host-side sink for update notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: UpdateNotice);
}

impl Notifier for mpsc::UnboundedSender<UpdateNotice> {
    fn notify(&self, notice: UpdateNotice) {
        if self.send(notice).is_err() {
            debug!("notifier: receiver dropped, notice discarded");
        }
    }
}

/// Runs one update check at a time for a single managed binary.
pub struct UpdateCoordinator<N> {
    config: UpdaterConfig,
    store: VersionStore,
    resolver: RemoteVersionResolver,
    fetcher: BinaryFetcher,
    notifier: N,
    in_flight: Mutex<()>,
}

impl<N: Notifier> UpdateCoordinator<N> {
    pub fn new(config: UpdaterConfig, notifier: N) -> Result<Self, reqwest::Error> {
        let store = VersionStore::new(&config.version_record_path);
        let resolver = RemoteVersionResolver::new(config.latest_alias_url())?;
        let fetcher = BinaryFetcher::new(&config.binary_path, store.clone())?;
        Ok(Self {
            config,
            store,
            resolver,
            fetcher,
            notifier,
            in_flight: Mutex::new(()),
        })
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.fetcher = self.fetcher.with_progress(progress);
        self
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    pub fn version_store(&self) -> &VersionStore {
        &self.store
    }

    pub fn resolver(&self) -> &RemoteVersionResolver {
        &self.resolver
    }

    /// Compare the recorded version with upstream and install the upstream
    /// binary when they differ. Overlapping calls run one after another.
    ///
    /// # Errors
    /// Only a failed download is reported; missing local or remote version
    /// information ends the check quietly.
    pub async fn check_update(&self) -> Result<CheckOutcome, FetchError> {
        let _guard = self.in_flight.lock().await;
        info!("check: starting update check for {}", self.config.platform);

        let (local, remote) = tokio::join!(
            self.store.get_local_version(),
            self.resolver.get_remote_version()
        );

        let Some(release) = remote.into_release() else {
            info!("check: no remote version available, nothing to do");
            return Ok(CheckOutcome::NoRemoteInfo);
        };

        if local.as_deref() == Some(release.version.as_str()) {
            info!("check: version {} is up to date", release.version);
            return Ok(CheckOutcome::UpToDate {
                version: release.version,
            });
        }

        info!(
            "check: updating from {} to {}",
            local.as_deref().unwrap_or("<none>"),
            release.version
        );
        self.notifier.notify(UpdateNotice::UpdateAvailable {
            current: local.clone(),
            latest: release.version.clone(),
        });

        self.fetcher
            .download_update(&release.download_url, &release.version)
            .await?;

        Ok(CheckOutcome::Updated {
            previous: local,
            version: release.version,
        })
    }
}
