/// Notification controller: turns connection events into what the user sees
/// and hears.
///
/// Lives on the UI loop. Events reach it over the channel the connection
/// manager writes to, so the presenter and alert are never touched from the
/// background thread.
use chrono::{DateTime, Local};
use tracing::info;

use crate::alert::Alert;
use crate::event::{ConnectionEvent, ConnectionState, JobEvent};
use crate::overlay::{self, Line, OverlayState, Presenter};

/// Status line text and colour for a connection state.
pub fn status_line(state: ConnectionState) -> Line {
    match state {
        ConnectionState::Connecting => Line::new("Connecting...", overlay::COLOR_IDLE),
        ConnectionState::Connected => Line::new("Connected", overlay::COLOR_OK),
        ConnectionState::Disconnected => Line::new("No connection", overlay::COLOR_ERROR),
        ConnectionState::Reconnecting => Line::new("Reconnecting...", overlay::COLOR_WARN),
    }
}

/// Short 12-hour clock, e.g. `03:07 PM`.
pub fn format_job_time(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%I:%M %p").to_string()
}

pub struct NotificationController<P: Presenter, A: Alert> {
    overlay: OverlayState,
    presenter: P,
    alert: A,
}

impl<P: Presenter, A: Alert> NotificationController<P, A> {
    /// Renders the initial overlay straight away.
    pub fn new(mut presenter: P, alert: A) -> Self {
        let overlay = OverlayState::new();
        presenter.render(&overlay);
        Self {
            overlay,
            presenter,
            alert,
        }
    }

    pub fn handle(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => self.on_state(state),
            ConnectionEvent::JobDetected(job) => self.on_job(job),
        }
    }

    /// Jobs detected since the client started.
    pub fn jobs(&self) -> u64 {
        self.overlay.jobs
    }

    #[cfg(test)]
    pub fn overlay(&self) -> &OverlayState {
        &self.overlay
    }

    /// Swaps the alert sound, e.g. after a config reload. The counter is kept.
    pub fn set_alert(&mut self, alert: A) {
        self.alert = alert;
    }

    /// Final render before the client exits.
    pub fn close(&mut self) {
        self.overlay.status = Line::new("Closed", overlay::COLOR_IDLE);
        self.presenter.render(&self.overlay);
    }

    fn on_state(&mut self, state: ConnectionState) {
        self.overlay.status = status_line(state);
        self.presenter.render(&self.overlay);
    }

    fn on_job(&mut self, job: JobEvent) {
        self.overlay.jobs += 1;
        self.overlay.counter = overlay::counter_text(self.overlay.jobs);
        self.overlay.job = Line::new(
            format!("Job! {}", format_job_time(&job.timestamp)),
            overlay::COLOR_OK,
        );
        self.overlay.last_job_at = Some(job.timestamp.to_rfc3339());
        info!("Print job #{} at {}", self.overlay.jobs, job.timestamp.to_rfc3339());

        self.presenter.render(&self.overlay);
        self.alert.play();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    use crate::connection::{ConnectionManager, TcpConnector};
    use crate::event::ConnectionState::*;

    #[derive(Clone, Default)]
    struct Frames(Rc<RefCell<Vec<OverlayState>>>);

    impl Frames {
        fn statuses(&self) -> Vec<String> {
            self.0.borrow().iter().map(|f| f.status.text.clone()).collect()
        }

        fn counters(&self) -> Vec<String> {
            self.0.borrow().iter().map(|f| f.counter.clone()).collect()
        }

        fn last(&self) -> OverlayState {
            self.0.borrow().last().cloned().unwrap()
        }
    }

    impl Presenter for Frames {
        fn render(&mut self, overlay: &OverlayState) {
            self.0.borrow_mut().push(overlay.clone());
        }
    }

    #[derive(Clone, Default)]
    struct Plays(Rc<Cell<usize>>);

    impl Alert for Plays {
        fn play(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn controller() -> (NotificationController<Frames, Plays>, Frames, Plays) {
        let frames = Frames::default();
        let plays = Plays::default();
        (
            NotificationController::new(frames.clone(), plays.clone()),
            frames,
            plays,
        )
    }

    fn job_at(h: u32, m: u32) -> ConnectionEvent {
        let timestamp = Local.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap();
        ConnectionEvent::JobDetected(JobEvent { timestamp })
    }

    // ── formatting ────────────────────────────────────────────────────────────

    #[test]
    fn status_lines_per_state() {
        assert_eq!(status_line(Connecting), Line::new("Connecting...", "#cccccc"));
        assert_eq!(status_line(Connected), Line::new("Connected", "#00ff00"));
        assert_eq!(status_line(Disconnected), Line::new("No connection", "#ff4444"));
        assert_eq!(status_line(Reconnecting), Line::new("Reconnecting...", "#ffaa00"));
    }

    #[test]
    fn job_time_is_twelve_hour_clock() {
        let afternoon = Local.with_ymd_and_hms(2024, 1, 15, 15, 7, 0).unwrap();
        let morning = Local.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap();
        assert_eq!(format_job_time(&afternoon), "03:07 PM");
        assert_eq!(format_job_time(&morning), "09:30 AM");
    }

    // ── controller ────────────────────────────────────────────────────────────

    #[test]
    fn new_renders_initial_overlay() {
        let (c, frames, plays) = controller();
        assert_eq!(frames.0.borrow().len(), 1);
        assert_eq!(frames.last(), OverlayState::new());
        assert_eq!(c.jobs(), 0);
        assert_eq!(plays.0.get(), 0);
    }

    #[test]
    fn state_change_updates_status_only() {
        let (mut c, frames, plays) = controller();
        c.handle(ConnectionEvent::StateChanged(Reconnecting));

        let last = frames.last();
        assert_eq!(last.status, status_line(Reconnecting));
        assert_eq!(last.job.text, "Waiting...");
        assert_eq!(c.jobs(), 0);
        assert_eq!(plays.0.get(), 0);
    }

    #[test]
    fn job_updates_counter_and_job_line_and_plays() {
        let (mut c, frames, plays) = controller();
        c.handle(ConnectionEvent::StateChanged(Connected));
        c.handle(job_at(15, 7));

        let last = frames.last();
        assert_eq!(last.job, Line::new("Job! 03:07 PM", "#00ff00"));
        assert_eq!(last.counter, "Jobs: 1");
        assert!(last.last_job_at.is_some());
        assert_eq!(last.status, status_line(Connected));
        assert_eq!(plays.0.get(), 1);
    }

    #[test]
    fn two_jobs_count_up_in_order() {
        let (mut c, frames, _) = controller();
        c.handle(job_at(10, 0));
        c.handle(job_at(10, 1));

        assert_eq!(c.jobs(), 2);
        assert_eq!(frames.counters(), vec!["Jobs: 0", "Jobs: 1", "Jobs: 2"]);
        assert_eq!(c.overlay().job.text, "Job! 10:01 AM");
    }

    #[test]
    fn three_jobs_in_one_session() {
        let (mut c, frames, plays) = controller();
        c.handle(ConnectionEvent::StateChanged(Connecting));
        c.handle(ConnectionEvent::StateChanged(Connected));
        for minute in 0..3 {
            c.handle(job_at(12, minute));
        }

        assert_eq!(c.jobs(), 3);
        assert_eq!(plays.0.get(), 3);
        assert_eq!(frames.last().counter, "Jobs: 3");
        // Status stays on Connected while jobs arrive.
        assert!(frames.0.borrow()[2..]
            .iter()
            .all(|f| f.status == status_line(Connected)));
    }

    #[test]
    fn counter_survives_reconnects_and_alert_swaps() {
        let (mut c, _, _) = controller();
        c.handle(job_at(8, 0));
        c.handle(ConnectionEvent::StateChanged(Reconnecting));
        c.handle(ConnectionEvent::StateChanged(Connecting));
        c.handle(ConnectionEvent::StateChanged(Connected));

        let replacement = Plays::default();
        c.set_alert(replacement.clone());
        c.handle(job_at(8, 5));

        assert_eq!(c.jobs(), 2);
        assert_eq!(replacement.0.get(), 1);
    }

    #[test]
    fn close_renders_closed_status() {
        let (mut c, frames, _) = controller();
        c.handle(job_at(9, 0));
        c.close();

        let last = frames.last();
        assert_eq!(last.status.text, "Closed");
        assert_eq!(last.counter, "Jobs: 1");
    }

    // ── end to end ────────────────────────────────────────────────────────────

    const TICK: Duration = Duration::from_millis(10);
    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn server_jobs_reach_overlay_and_alert() {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for _ in 0..3 {
                stream.write_all(b"PRINT_JOB\r\n").unwrap();
                std::thread::sleep(TICK * 2);
            }
            let mut sink = [0u8; 8];
            let _ = stream.read(&mut sink);
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ConnectionEvent>();
        let connector = TcpConnector::new(addr.to_string(), Duration::from_secs(1), TICK * 2);
        let handle = ConnectionManager::with_timing(connector, TICK * 2, TICK)
            .start(tx)
            .unwrap();

        let (mut c, frames, plays) = controller();
        while c.jobs() < 3 {
            let event = tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("timed out waiting for events")
                .expect("connection loop ended early");
            c.handle(event);
        }
        handle.stop();
        server.join().unwrap();

        assert_eq!(plays.0.get(), 3);
        assert_eq!(frames.last().counter, "Jobs: 3");
        assert_eq!(c.overlay().status, status_line(Connected));
        assert_eq!(
            frames.statuses()[..3],
            ["Connecting...", "Connecting...", "Connected"]
        );
    }

    #[tokio::test]
    async fn flaky_connects_are_shown_in_order() {
        use std::collections::VecDeque;
        use crate::connection::{Connector, Link};

        struct Idle;
        impl std::io::Read for Idle {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                std::thread::sleep(TICK);
                Err(std::io::ErrorKind::WouldBlock.into())
            }
        }
        impl Link for Idle {
            fn close(&mut self) {}
        }

        struct Flaky(VecDeque<bool>);
        impl Connector for Flaky {
            fn connect(&mut self) -> std::io::Result<Box<dyn Link>> {
                if self.0.pop_front().unwrap_or(true) {
                    Ok(Box::new(Idle))
                } else {
                    Err(std::io::ErrorKind::ConnectionRefused.into())
                }
            }
            fn target(&self) -> &str {
                "flaky"
            }
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ConnectionEvent>();
        let handle = ConnectionManager::with_timing(
            Flaky(VecDeque::from([false, false, true])),
            TICK * 2,
            TICK,
        )
        .start(tx)
        .unwrap();

        let (mut c, frames, _) = controller();
        for _ in 0..6 {
            let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            c.handle(event);
        }
        handle.stop();

        // The first frame is the initial overlay.
        assert_eq!(
            frames.statuses()[1..],
            [
                "Connecting...",
                "No connection",
                "Connecting...",
                "No connection",
                "Connecting...",
                "Connected",
            ]
        );
    }
}
