use std::env;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "ytdl-updater";
const VERSION_RECORD_FILE: &str = "ytdl-version.json";

/// Returns the root directory used by the updater for the current user.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR_NAME)
}

/// Directory holding the managed binary.
pub fn bin_dir() -> PathBuf {
    default_app_dir().join("bin")
}

pub fn version_record_path() -> PathBuf {
    default_app_dir().join(VERSION_RECORD_FILE)
}
