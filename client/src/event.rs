use chrono::{DateTime, Local};

use crate::config::Config;

/// Connection lifecycle as seen by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// A `PRINT_JOB` token arrived from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobEvent {
    pub timestamp: DateTime<Local>,
}

impl JobEvent {
    pub fn now() -> Self {
        Self { timestamp: Local::now() }
    }
}

/// Everything the connection manager reports to its subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The manager moved to a new state.
    StateChanged(ConnectionState),
    /// The server signalled a print job.
    JobDetected(JobEvent),
}

pub enum AppEvent {
    /// Forwarded from the connection manager's background thread.
    Connection(ConnectionEvent),
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Ctrl+C received or the overlay was closed; stop the client and exit.
    Shutdown,
}

impl From<ConnectionEvent> for AppEvent {
    fn from(event: ConnectionEvent) -> Self {
        AppEvent::Connection(event)
    }
}
