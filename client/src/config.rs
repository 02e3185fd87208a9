use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::event::AppEvent;
use crate::paths;

pub const DEFAULT_SERVER_HOST: &str = "10.1.251.129";
pub const DEFAULT_SERVER_PORT: u16 = 49152;
pub const DEFAULT_BACKOFF_SECS: u64 = 2;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 1;
/// Resolved against the app data directory when relative.
pub const DEFAULT_SOUND_FILE: &str = "print alert.mp3";

/// Root configuration structure. Deserialized from `<config dir>/PrintAlert/config.toml`.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub alert: AlertConfig,
}

/// Address of the print server pushing `PRINT_JOB` tokens.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

impl ServerConfig {
    /// `host:port`, suitable for `ToSocketAddrs`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Timing of the reconnect loop. All values are whole seconds; zero is raised to one.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Pause after a failed connect before the next attempt.
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,
    /// Upper bound on a single blocking read. Also bounds shutdown latency.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Budget for one connect attempt across every resolved address. Capped at
    /// the read timeout so a stop request during a connect is seen within one tick.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff_secs: DEFAULT_BACKOFF_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ConnectionConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1)).min(self.read_timeout())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AlertConfig {
    #[serde(default = "default_alert_enabled")]
    pub enabled: bool,
    /// Audio file played once per print job. An empty string disables playback.
    #[serde(default = "default_sound_file")]
    pub sound_file: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sound_file: DEFAULT_SOUND_FILE.to_string(),
        }
    }
}

impl AlertConfig {
    /// Returns the sound file to play, or `None` when the alert is disabled.
    /// Relative paths are resolved against `base_dir`.
    pub fn sound_path(&self, base_dir: &Path) -> Option<PathBuf> {
        if !self.enabled || self.sound_file.trim().is_empty() {
            return None;
        }
        let candidate = Path::new(&self.sound_file);
        if candidate.is_absolute() {
            Some(candidate.to_path_buf())
        } else {
            Some(base_dir.join(candidate))
        }
    }
}

impl Config {
    /// True when switching from `self` to `other` requires a fresh connection.
    pub fn needs_reconnect(&self, other: &Config) -> bool {
        self.server != other.server || self.connection != other.connection
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Watches the parent directory of `path`. Whenever the config file is created
/// or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::UnboundedSender<AppEvent>) {
    let path = paths::absolute(&path);
    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel::<notify::Event>();

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create config watcher: {e}");
            return;
        }
    };

    // The parent directory is watched so editor-style atomic saves
    // (write-new + rename) are still seen.
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            error!("Config path has no parent directory: {}", path.display());
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!("Failed to watch config directory {}: {e}", watch_dir.display());
        return;
    }
    debug!("Watching {} for config changes", watch_dir.display());

    let mut last_loaded: Option<Config> = None;
    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );
        if !(affects_config && is_write) {
            continue;
        }

        match load_or_default(&path) {
            // A single save usually fires several modify events.
            Ok(config) if last_loaded.as_ref() == Some(&config) => {}
            Ok(config) => {
                info!("Config file changed, reloading");
                last_loaded = Some(config.clone());
                if tx.send(AppEvent::ConfigReloaded(config)).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Failed to reload config: {e:#}"),
        }
    }
}

fn default_host() -> String {
    DEFAULT_SERVER_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_backoff() -> u64 {
    DEFAULT_BACKOFF_SECS
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_alert_enabled() -> bool {
    true
}

fn default_sound_file() -> String {
    DEFAULT_SOUND_FILE.to_string()
}
