use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::storage::{StoreError, VersionStore};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const PROGRESS_INTERVAL_SECS: f32 = 0.2;
const SPEED_UNITS: [&str; 3] = ["B/s", "KB/s", "MB/s"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("download status error: {0}")]
    Status(StatusCode),
    #[error("stream error: {0}")]
    Stream(#[source] reqwest::Error),
    #[error("failed to create download dir {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("write error on {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("download incomplete: received {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },
    #[error("failed to install binary at {}: {source}", path.display())]
    Install {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Record(#[from] StoreError),
}

#[derive(Clone, Debug)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
    /// `None` while the upstream has not announced a length.
    pub percent: Option<f32>,
    pub speed: String,
}

impl DownloadProgress {
    fn new(downloaded: u64, total: Option<u64>, bytes_per_sec: f32) -> Self {
        let percent = total
            .filter(|&total| total > 0)
            .map(|total| (downloaded.min(total) as f32 / total as f32) * 100.0);
        Self {
            downloaded,
            total,
            percent,
            speed: speed_label(bytes_per_sec),
        }
    }
}

fn speed_label(bytes_per_sec: f32) -> String {
    let mut value = bytes_per_sec.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < SPEED_UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{value:.0} {}", SPEED_UNITS[unit])
    } else {
        format!("{value:.1} {}", SPEED_UNITS[unit])
    }
}

pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Streams a release to disk and installs it over the managed binary.
#[derive(Clone)]
pub struct BinaryFetcher {
    client: Client,
    binary_path: PathBuf,
    store: VersionStore,
    progress: Option<ProgressCallback>,
}

impl BinaryFetcher {
    pub fn new(
        binary_path: impl Into<PathBuf>,
        store: VersionStore,
    ) -> Result<Self, reqwest::Error> {
        Self::with_timeout(binary_path, store, DOWNLOAD_TIMEOUT)
    }

    /// Like [`BinaryFetcher::new`] with an explicit whole-request timeout.
    pub fn with_timeout(
        binary_path: impl Into<PathBuf>,
        store: VersionStore,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            binary_path: binary_path.into(),
            store,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Download `url` over the managed binary and record `version` once the
    /// new binary is in place. On any failure the record is left untouched.
    pub async fn download_update(&self, url: &str, version: &str) -> Result<(), FetchError> {
        info!(
            "fetcher: downloading {version} from {url} to {}",
            self.binary_path.display()
        );
        let part_path = self.part_path();

        if let Err(err) = self.download_to_part(url, &part_path).await {
            warn!("fetcher: download of {version} failed: {err}");
            discard(&part_path).await;
            return Err(err);
        }

        if let Err(source) = fs::rename(&part_path, &self.binary_path).await {
            discard(&part_path).await;
            return Err(FetchError::Install {
                path: self.binary_path.clone(),
                source,
            });
        }
        set_executable(&self.binary_path).await?;

        self.store.write_version_info(version).await?;
        info!("fetcher: installed version {version}");
        Ok(())
    }

    // Sibling of the target so the final rename stays on one filesystem.
    fn part_path(&self) -> PathBuf {
        let name = self
            .binary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "binary".to_owned());
        self.binary_path.with_file_name(format!(".{name}.part"))
    }

    async fn download_to_part(&self, url: &str, part_path: &Path) -> Result<(), FetchError> {
        if let Some(parent) = part_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let write_err = |source| FetchError::Write {
            path: part_path.to_path_buf(),
            source,
        };
        let mut file = File::create(part_path).await.map_err(write_err)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::Request)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_tick = Instant::now();
        let mut last_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(FetchError::Stream)?;
            file.write_all(&chunk).await.map_err(write_err)?;
            downloaded += chunk.len() as u64;

            let since = last_tick.elapsed().as_secs_f32();
            if since > PROGRESS_INTERVAL_SECS {
                let speed = (downloaded - last_bytes) as f32 / since;
                self.emit_progress(downloaded, total, speed);
                last_tick = Instant::now();
                last_bytes = downloaded;
            }
        }

        // Final callback.
        self.emit_progress(downloaded, total, 0.0);

        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        if let Some(total) = total
            && downloaded < total
        {
            return Err(FetchError::Incomplete {
                received: downloaded,
                expected: total,
            });
        }

        debug!(
            "fetcher: wrote {downloaded} bytes to {}",
            part_path.display()
        );
        Ok(())
    }

    fn emit_progress(&self, downloaded: u64, total: Option<u64>, bytes_per_sec: f32) {
        if let Some(callback) = self.progress.as_deref() {
            callback(DownloadProgress::new(downloaded, total, bytes_per_sec));
        }
    }
}

async fn discard(part_path: &Path) {
    if let Err(err) = fs::remove_file(part_path).await
        && err.kind() != io::ErrorKind::NotFound
    {
        debug!(
            "fetcher: unable to remove partial file {} ({err})",
            part_path.display()
        );
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<(), FetchError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|source| FetchError::Install {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<(), FetchError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener};
    use std::sync::Mutex;
    use std::thread;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &[u8] = b"#!/bin/sh\necho youtube-dl\n";
    const RELEASE_PATH: &str = "/downloads/2021.03.14/youtube-dl";

    fn fetcher_in(dir: &TempDir) -> BinaryFetcher {
        let store = VersionStore::new(dir.path().join("ytdl-version.json"));
        BinaryFetcher::new(dir.path().join("bin").join("youtube-dl"), store).unwrap()
    }

    fn seed_install(dir: &TempDir, fetcher: &BinaryFetcher) {
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(fetcher.binary_path(), b"old").unwrap();
        std::fs::write(dir.path().join("ytdl-version.json"), "{\"version\":\"2021.02.01\"}")
            .unwrap();
    }

    fn assert_install_untouched(dir: &TempDir, fetcher: &BinaryFetcher) {
        assert_eq!(std::fs::read(fetcher.binary_path()).unwrap(), b"old");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ytdl-version.json")).unwrap(),
            "{\"version\":\"2021.02.01\"}"
        );
        assert!(!fetcher.part_path().exists());
    }

    // One-shot HTTP server that writes `response` verbatim, then keeps the
    // connection open for `hold` before closing it.
    fn serve_raw(response: &'static [u8], hold: Duration) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let _ = socket.write_all(response);
            let _ = socket.flush();
            thread::sleep(hold);
        });
        addr
    }

    async fn serve_release(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RELEASE_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(BODY))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn installs_binary_and_records_version() {
        let dir = TempDir::new().unwrap();
        let server = serve_release(200).await;
        let fetcher = fetcher_in(&dir);

        fetcher
            .download_update(&format!("{}{RELEASE_PATH}", server.uri()), "2021.03.14")
            .await
            .unwrap();

        assert_eq!(std::fs::read(fetcher.binary_path()).unwrap(), BODY);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ytdl-version.json")).unwrap(),
            "{\"version\":\"2021.03.14\"}"
        );
        assert!(!fetcher.part_path().exists());
    }

    #[test]
    fn labels_transfer_speed() {
        assert_eq!(speed_label(0.0), "0 B/s");
        assert_eq!(speed_label(512.0), "512 B/s");
        assert_eq!(speed_label(2_048.0), "2.0 KB/s");
        assert_eq!(speed_label(5_242_880.0), "5.0 MB/s");
        assert_eq!(speed_label(3.0 * 1024.0 * 1024.0 * 1024.0), "3072.0 MB/s");
    }

    #[test]
    fn percent_is_unknown_without_length() {
        assert_eq!(DownloadProgress::new(5, Some(10), 0.0).percent, Some(50.0));
        assert_eq!(DownloadProgress::new(5, None, 0.0).percent, None);
        assert_eq!(DownloadProgress::new(5, Some(0), 0.0).percent, None);
        assert_eq!(DownloadProgress::new(20, Some(10), 0.0).percent, Some(100.0));
    }

    #[tokio::test]
    async fn replaces_existing_binary() {
        let dir = TempDir::new().unwrap();
        let server = serve_release(200).await;
        let fetcher = fetcher_in(&dir);
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(fetcher.binary_path(), b"old").unwrap();

        fetcher
            .download_update(&format!("{}{RELEASE_PATH}", server.uri()), "2021.03.14")
            .await
            .unwrap();

        assert_eq!(std::fs::read(fetcher.binary_path()).unwrap(), BODY);
    }

    #[tokio::test]
    async fn bad_status_keeps_old_binary_and_record() {
        let dir = TempDir::new().unwrap();
        let server = serve_release(500).await;
        let fetcher = fetcher_in(&dir);
        seed_install(&dir, &fetcher);

        let err = fetcher
            .download_update(&format!("{}{RELEASE_PATH}", server.uri()), "2021.03.14")
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status(StatusCode::INTERNAL_SERVER_ERROR)));
        assert_install_untouched(&dir, &fetcher);
    }

    #[tokio::test]
    async fn truncated_body_rejects_and_keeps_old_install() {
        let dir = TempDir::new().unwrap();
        let fetcher = fetcher_in(&dir);
        seed_install(&dir, &fetcher);
        let addr = serve_raw(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nshortbody",
            Duration::ZERO,
        );

        let err = fetcher
            .download_update(&format!("http://{addr}{RELEASE_PATH}"), "2021.03.14")
            .await
            .unwrap_err();

        assert!(
            matches!(err, FetchError::Stream(_) | FetchError::Incomplete { .. }),
            "{err}"
        );
        assert_install_untouched(&dir, &fetcher);
    }

    #[tokio::test]
    async fn stalled_body_times_out() {
        let dir = TempDir::new().unwrap();
        let store = VersionStore::new(dir.path().join("ytdl-version.json"));
        let fetcher = BinaryFetcher::with_timeout(
            dir.path().join("bin").join("youtube-dl"),
            store,
            Duration::from_millis(300),
        )
        .unwrap();
        seed_install(&dir, &fetcher);
        let addr = serve_raw(
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial",
            Duration::from_secs(5),
        );

        let err = fetcher
            .download_update(&format!("http://{addr}{RELEASE_PATH}"), "2021.03.14")
            .await
            .unwrap_err();

        let timed_out = match &err {
            FetchError::Stream(source) | FetchError::Request(source) => source.is_timeout(),
            _ => false,
        };
        assert!(timed_out, "{err}");
        assert_install_untouched(&dir, &fetcher);
    }

    #[tokio::test]
    async fn output_failure_rejects_without_recording_version() {
        let dir = TempDir::new().unwrap();
        // A regular file where the binary directory should be.
        let blocker = dir.path().join("bin");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let fetcher = fetcher_in(&dir);

        let err = fetcher
            .download_update("http://127.0.0.1:9/never-requested", "2021.03.14")
            .await
            .unwrap_err();

        assert!(
            matches!(err, FetchError::CreateDir { .. } | FetchError::Write { .. }),
            "{err}"
        );
        assert!(!dir.path().join("ytdl-version.json").exists());
    }

    #[tokio::test]
    async fn reports_final_progress() {
        let dir = TempDir::new().unwrap();
        let server = serve_release(200).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let fetcher = fetcher_in(&dir).with_progress(Arc::new(move |p: DownloadProgress| {
            sink.lock().unwrap().push(p);
        }));

        fetcher
            .download_update(&format!("{}{RELEASE_PATH}", server.uri()), "2021.03.14")
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.downloaded, BODY.len() as u64);
        assert_eq!(last.total, Some(BODY.len() as u64));
        assert_eq!(last.percent, Some(100.0));
        assert_eq!(last.speed, "0 B/s");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn marks_installed_binary_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let server = serve_release(200).await;
        let fetcher = fetcher_in(&dir);

        fetcher
            .download_update(&format!("{}{RELEASE_PATH}", server.uri()), "2021.03.14")
            .await
            .unwrap();

        let mode = std::fs::metadata(fetcher.binary_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
