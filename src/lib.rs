//! Keeps a locally cached `youtube-dl` binary in step with the latest
//! upstream release.
//!
//! The latest version is discovered by probing the upstream "latest" alias
//! with redirects disabled and reading the version out of the `Location`
//! header. When it differs from the locally recorded version the release is
//! streamed to a temporary file, renamed over the managed binary, and only
//! then recorded as installed.

pub mod engine;
pub mod env;
pub mod networking;
pub mod storage;
pub mod updater;

pub use engine::models::{
    PlatformTarget, RemoteRelease, RemoteVersionInfo, UpdaterConfig, VersionRecord,
};
pub use engine::state::{CheckOutcome, UpdateNotice};
pub use engine::{Notifier, UpdateCoordinator};
pub use networking::{BinaryFetcher, DownloadProgress, FetchError};
pub use storage::{StoreError, VersionStore};
pub use updater::{ProbeError, RemoteVersionResolver};
