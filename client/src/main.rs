mod alert;
mod config;
mod connection;
mod controller;
mod event;
mod overlay;
mod paths;
mod protocol;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::alert::SoundAlert;
use crate::connection::{ConnectionHandle, ConnectionManager, TcpConnector};
use crate::controller::NotificationController;
use crate::event::AppEvent;
use crate::overlay::StatusFilePresenter;

/// Print alert client - chimes and counts whenever the print server reports a job
#[derive(Parser)]
#[command(name = "print-alert")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/PrintAlert/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where the overlay state is published (defaults to <config dir>/PrintAlert/status.toml)
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

// The UI loop is single-threaded; all blocking socket I/O happens on the
// connection manager's own thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("Failed to create app data directory {}", app_dir.display()))?;

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::absolute(&cli.config.unwrap_or_else(paths::config_file_path));
    let mut config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        warn!("Using default config: {e:#}");
        config::Config::default()
    });
    // Relative sound paths live next to the config file.
    let sound_dir = config_path.parent().unwrap_or(app_dir.as_path()).to_path_buf();

    // ── Presentation ──────────────────────────────────────────────────────────
    let presenter = StatusFilePresenter::new(cli.status_file.unwrap_or_else(paths::status_file_path));
    info!("Publishing overlay state to {}", presenter.path().display());
    let mut controller =
        NotificationController::new(presenter, SoundAlert::new(config.alert.sound_path(&sound_dir)));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AppEvent>();

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path.clone(), event_tx.clone()));

    // Ctrl+C is also what the overlay's close button sends.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(AppEvent::Shutdown);
            }
        });
    }

    let mut connection = start_connection(&config, &event_tx);

    info!("print-alert v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            AppEvent::Connection(event) => controller.handle(event),

            AppEvent::ConfigReloaded(new_config) => {
                if new_config.alert != config.alert {
                    controller.set_alert(SoundAlert::new(new_config.alert.sound_path(&sound_dir)));
                }
                if config.needs_reconnect(&new_config) {
                    info!(
                        "Connection settings changed; switching to {}",
                        new_config.server.address()
                    );
                    if let Some(handle) = connection.take() {
                        stop_connection(handle).await;
                    }
                    connection = start_connection(&new_config, &event_tx);
                }
                config = new_config;
            }

            AppEvent::Shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    if let Some(handle) = connection.take() {
        stop_connection(handle).await;
    }
    info!("{} print job(s) detected this session", controller.jobs());
    controller.close();
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Starts a connection loop for `config`. A failure to spawn the thread is
/// logged; the overlay keeps running and a later config change retries.
fn start_connection(
    config: &config::Config,
    tx: &mpsc::UnboundedSender<AppEvent>,
) -> Option<ConnectionHandle> {
    let connector = TcpConnector::from_config(&config.server, &config.connection);
    match ConnectionManager::new(connector, &config.connection).start(tx.clone()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Failed to start connection thread: {e}");
            None
        }
    }
}

/// Joins the connection thread on the blocking pool. The event loop awaits
/// the join, so queued events wait up to one read timeout; connects are capped
/// at the same tick.
async fn stop_connection(handle: ConnectionHandle) {
    let state = handle.state();
    if let Err(e) = tokio::task::spawn_blocking(move || handle.stop()).await {
        error!("Failed to stop connection thread: {e}");
    }
    info!("Connection closed (was {state:?})");
}
