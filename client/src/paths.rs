/// Canonical file paths for the client's data files.
///
/// Everything lives under `<config dir>/PrintAlert/` (`%APPDATA%\PrintAlert\` on Windows):
///   - config.toml  Edited by the user, read (and watched) by the client.
///   - status.toml  Written by the client, read by the overlay widget.
///
/// Relative alert sound paths are resolved against the same directory.
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "PrintAlert";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the application data directory. Falls back to `./PrintAlert` when
/// the platform has no per-user config directory.
pub fn app_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}

/// Anchors a user-supplied path (e.g. `--config ./cfg/config.toml`) to the
/// current directory. File watchers report absolute paths, so anything compared
/// against their events must be absolute too.
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
