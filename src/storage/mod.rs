use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;
use tokio::fs;

use crate::engine::models::VersionRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to create version record dir {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to serialize version record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unable to persist version to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Reads and writes the JSON record of the installed binary's version.
#[derive(Clone, Debug)]
pub struct VersionStore {
    record_path: PathBuf,
}

impl VersionStore {
    pub fn new(record_path: impl Into<PathBuf>) -> Self {
        Self {
            record_path: record_path.into(),
        }
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    /// Version recorded for the installed binary. A missing, unreadable or
    /// malformed record all read as `None`.
    pub async fn get_local_version(&self) -> Option<String> {
        let bytes = match fs::read(&self.record_path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(
                    "version store: no readable record at {} ({err})",
                    self.record_path.display()
                );
                return None;
            }
        };
        match serde_json::from_slice::<VersionRecord>(&bytes) {
            Ok(record) => Some(record.version),
            Err(err) => {
                debug!(
                    "version store: ignoring malformed record at {} ({err})",
                    self.record_path.display()
                );
                None
            }
        }
    }

    /// Overwrite the record with `{"version":"<version>"}`.
    pub async fn write_version_info(&self, version: &str) -> Result<(), StoreError> {
        let record = VersionRecord {
            version: version.to_owned(),
        };
        let contents = serde_json::to_string(&record)?;
        if let Some(parent) = self.record_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        fs::write(&self.record_path, contents)
            .await
            .map_err(|source| StoreError::Write {
                path: self.record_path.clone(),
                source,
            })?;
        debug!(
            "version store: recorded version {version} at {}",
            self.record_path.display()
        );
        Ok(())
    }
}
