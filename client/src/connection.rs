/// Connection manager: keeps one outbound stream to the print server alive.
///
/// The loop runs on a dedicated OS thread and does all blocking socket I/O
/// there. Each iteration either attempts a connect or performs one read bounded
/// by the read timeout, then re-checks the shared `running` flag, so a stop
/// request is observed within one timeout tick.
///
/// State changes and job signals leave the thread only through the event
/// channel handed to [`ConnectionManager::start`]; the socket itself never does.
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ConnectionConfig, ServerConfig};
use crate::event::{ConnectionEvent, ConnectionState, JobEvent};
use crate::protocol::{Message, TokenDecoder};

const READ_BUFFER_BYTES: usize = 1024;

// ── Transport seam ────────────────────────────────────────────────────────────

/// An open stream to the server.
///
/// `read` must honour a timeout, reporting it as `WouldBlock` or `TimedOut`.
/// `close` must be safe to call more than once.
pub trait Link: Read + Send {
    fn close(&mut self);
}

/// Opens [`Link`]s to a fixed target.
pub trait Connector: Send + 'static {
    fn connect(&mut self) -> io::Result<Box<dyn Link>>;

    /// Human-readable target, for logs.
    fn target(&self) -> &str;
}

/// Plain TCP to `host:port`.
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            read_timeout,
        }
    }

    pub fn from_config(server: &ServerConfig, timing: &ConnectionConfig) -> Self {
        Self::new(server.address(), timing.connect_timeout(), timing.read_timeout())
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self) -> io::Result<Box<dyn Link>> {
        // One budget for all resolved addresses, not one per address.
        let deadline = Instant::now() + self.connect_timeout;
        let mut last_err = None;
        for addr in self.address.to_socket_addrs()? {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                last_err = Some(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.address),
                ));
                break;
            }
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.read_timeout))?;
                    return Ok(Box::new(TcpLink::new(stream)));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.address),
            )
        }))
    }

    fn target(&self) -> &str {
        &self.address
    }
}

pub struct TcpLink {
    stream: Option<TcpStream>,
}

impl TcpLink {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream: Some(stream) }
    }
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }
}

impl Link for TcpLink {
    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // The peer may already be gone; dropping the stream releases it either way.
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Owns a [`Connector`] until [`start`](Self::start) moves it onto the loop thread.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    backoff: Duration,
    tick: Duration,
}

impl<C: Connector> ConnectionManager<C> {
    /// Uses the configured backoff; the read timeout doubles as the tick used
    /// to slice backoff waits.
    pub fn new(connector: C, timing: &ConnectionConfig) -> Self {
        Self::with_timing(connector, timing.backoff(), timing.read_timeout())
    }

    pub fn with_timing(connector: C, backoff: Duration, tick: Duration) -> Self {
        Self {
            connector,
            backoff,
            tick,
        }
    }

    /// Spawns the loop thread. Every state change and job is sent on `events`.
    ///
    /// Dropping the receiving end of `events` also stops the loop.
    pub fn start<E>(self, events: mpsc::UnboundedSender<E>) -> io::Result<ConnectionHandle>
    where
        E: From<ConnectionEvent> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(Mutex::new(ConnectionState::Disconnected));

        let worker = Worker {
            connector: self.connector,
            events,
            running: Arc::clone(&running),
            state: Arc::clone(&state),
            backoff: self.backoff,
            tick: self.tick,
            link: None,
            decoder: TokenDecoder::new(),
            failed_attempts: 0,
        };

        let thread = std::thread::Builder::new()
            .name("connection".into())
            .spawn(move || worker.run())?;

        Ok(ConnectionHandle {
            running,
            state,
            thread: Some(thread),
        })
    }
}

/// Handle to a running connection loop.
pub struct ConnectionHandle {
    running: Arc<AtomicBool>,
    state: Arc<Mutex<ConnectionState>>,
    thread: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Snapshot of the loop's current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once the loop thread has exited.
    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Requests shutdown and blocks until the loop thread has exited.
    ///
    /// Once this returns the socket is closed and no further events are sent.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Connection thread panicked");
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

// ── Loop ──────────────────────────────────────────────────────────────────────

struct Worker<C, E> {
    connector: C,
    events: mpsc::UnboundedSender<E>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<ConnectionState>>,
    backoff: Duration,
    tick: Duration,
    link: Option<Box<dyn Link>>,
    decoder: TokenDecoder,
    failed_attempts: u32,
}

impl<C, E> Worker<C, E>
where
    C: Connector,
    E: From<ConnectionEvent>,
{
    fn run(mut self) {
        info!("Connection loop started for {}", self.connector.target());
        while self.is_running() {
            self.step();
        }
        self.close_link();
        info!("Connection loop stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn step(&mut self) {
        let mut buf = [0u8; READ_BUFFER_BYTES];
        let result = match self.link.as_mut() {
            Some(link) => link.read(&mut buf),
            None => {
                self.connect();
                return;
            }
        };

        match result {
            Ok(0) => {
                if let Some(message) = self.decoder.flush() {
                    self.handle_message(message);
                }
                info!("Server closed the connection");
                self.lose_connection();
            }
            Ok(n) => {
                for message in self.decoder.feed(&buf[..n]) {
                    self.handle_message(message);
                }
            }
            Err(e) if is_timeout(&e) => {
                // Quiet peer: whatever fragment is pending is a whole token.
                if let Some(message) = self.decoder.flush() {
                    self.handle_message(message);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Connection lost: {e}");
                self.lose_connection();
            }
        }
    }

    fn connect(&mut self) {
        self.transition(ConnectionState::Connecting);
        match self.connector.connect() {
            Ok(link) => {
                info!("Connected to {}", self.connector.target());
                self.failed_attempts = 0;
                self.decoder.reset();
                self.link = Some(link);
                self.transition(ConnectionState::Connected);
            }
            Err(e) => {
                self.failed_attempts += 1;
                // Only the first failure of a streak is worth a warning; the
                // rest repeat every backoff until the server comes back.
                if self.failed_attempts == 1 {
                    warn!("Cannot connect to {}: {e}", self.connector.target());
                } else {
                    debug!(
                        "Connect attempt {} to {} failed: {e}",
                        self.failed_attempts,
                        self.connector.target()
                    );
                }
                self.transition(ConnectionState::Disconnected);
                self.pause(self.backoff);
            }
        }
    }

    fn lose_connection(&mut self) {
        self.close_link();
        self.decoder.reset();
        self.transition(ConnectionState::Reconnecting);
    }

    fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::PrintJob => {
                info!("Print job signalled");
                self.emit(ConnectionEvent::JobDetected(JobEvent::now()));
            }
            Message::Unknown(token) => debug!("Ignoring unknown token {token:?}"),
            Message::NonText(bytes) => {
                warn!("Ignoring non-text payload ({} bytes)", bytes.len())
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        {
            let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == next {
                return;
            }
            *current = next;
        }
        debug!("Connection state -> {next:?}");
        self.emit(ConnectionEvent::StateChanged(next));
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(E::from(event)).is_err() {
            debug!("Event receiver dropped; stopping connection loop");
            self.running.store(false, Ordering::SeqCst);
        }
    }

    /// Sleeps for `total`, waking every tick to honour a stop request.
    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(self.tick));
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
