use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

pub const COLOR_OK: &str = "#00ff00";
pub const COLOR_ERROR: &str = "#ff4444";
pub const COLOR_WARN: &str = "#ffaa00";
pub const COLOR_IDLE: &str = "#cccccc";

/// One coloured line of overlay text.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Line {
    pub text: String,
    /// `#rrggbb`
    pub color: String,
}

impl Line {
    pub fn new(text: impl Into<String>, color: &str) -> Self {
        Self {
            text: text.into(),
            color: color.to_string(),
        }
    }
}

/// What the always-on-top overlay shows. Written by the client to
/// `<config dir>/PrintAlert/status.toml`; the overlay widget reads it (read-only)
/// and owns layout, dragging and the close button.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OverlayState {
    /// Client binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Jobs detected since the client started.
    pub jobs: u64,
    /// "Jobs: N", ready to display.
    pub counter: String,
    /// RFC 3339 timestamp of the most recent job, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_job_at: Option<String>,
    /// Connection status line.
    pub status: Line,
    /// Last-job line.
    pub job: Line,
}

impl OverlayState {
    /// The overlay as it looks before the first connect attempt.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            jobs: 0,
            counter: counter_text(0),
            last_job_at: None,
            status: Line::new("Connecting...", COLOR_IDLE),
            job: Line::new("Waiting...", COLOR_OK),
        }
    }
}

impl Default for OverlayState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn counter_text(jobs: u64) -> String {
    format!("Jobs: {jobs}")
}

/// The presentation layer. Only ever called from the UI loop.
pub trait Presenter {
    fn render(&mut self, overlay: &OverlayState);
}

/// Publishes the overlay to a status file for the overlay widget.
pub struct StatusFilePresenter {
    path: PathBuf,
    last: Option<OverlayState>,
}

impl StatusFilePresenter {
    pub fn new(path: PathBuf) -> Self {
        Self { path, last: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Presenter for StatusFilePresenter {
    fn render(&mut self, overlay: &OverlayState) {
        if self.last.as_ref() == Some(overlay) {
            return;
        }
        debug!(
            "Overlay: {} | {} | {}",
            overlay.status.text, overlay.job.text, overlay.counter
        );
        write_overlay(&self.path, overlay);
        self.last = Some(overlay.clone());
    }
}

/// Serializes `overlay` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Failures are logged; a status write never takes the client down.
pub fn write_overlay(path: &Path, overlay: &OverlayState) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!("Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(overlay) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                error!("Failed to write status file {}: {e}", path.display());
            }
        }
        Err(e) => error!("Failed to serialize overlay state: {e}"),
    }
}
