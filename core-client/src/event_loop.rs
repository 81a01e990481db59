//! # Event Loop
//!
//! Dedicated thread driving the async connection.
//!
//! ## Overview
//!
//! The loop repeatedly pumps its [`Connection`]: queued requests are
//! flushed, the transport is polled for at most one poll interval (20ms by
//! default) and every complete frame is routed. It is the only thread that
//! completes async results and delivers emissions, so observers never run
//! concurrently with each other.
//!
//! ## Shutdown
//!
//! [`EventLoop::stop`] raises a flag checked between pumps and then blocks
//! on a condition variable until the thread reports that it has left its
//! loop, so a frame is never abandoned half-routed. Called from the loop
//! thread itself (for example by an observer), `stop` only raises the flag.
//!
//! When the transport fails the loss handler runs once on the loop thread
//! and the loop exits. It does not reconnect. A loss noticed on another
//! thread is handed over with [`EventLoop::report_loss`] and handled on the
//! loop thread as well.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::connection::{Connection, SubscriptionSink};
use crate::error::{ClientError, Result};

/// Name of the event-loop thread.
pub const THREAD_NAME: &str = "xmms-event-loop";

/// Runs once on the loop thread when the connection is lost.
pub type LossHandler = Box<dyn FnOnce(ClientError) + Send>;

#[derive(Default)]
struct LossReports {
    closed: bool,
    loss: Option<ClientError>,
}

struct LoopShared {
    stop: AtomicBool,
    exited: Mutex<bool>,
    exit_signal: Condvar,
    reports: Mutex<LossReports>,
}

impl LoopShared {
    fn take_reported_loss(&self) -> Option<ClientError> {
        self.reports.lock().loss.take()
    }

    /// Refuses further reports and returns one that arrived meanwhile.
    fn close_reports(&self) -> Option<ClientError> {
        let mut reports = self.reports.lock();
        reports.closed = true;
        reports.loss.take()
    }
}

/// Marks the loop as exited even if the thread unwinds.
struct ExitGuard(Arc<LoopShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.reports.lock().closed = true;
        let mut exited = self.0.exited.lock();
        *exited = true;
        self.0.exit_signal.notify_all();
    }
}

/// Handle to a running event-loop thread.
pub struct EventLoop {
    shared: Arc<LoopShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread: ThreadId,
}

impl EventLoop {
    /// Starts the loop thread for `connection`.
    pub fn spawn(
        connection: Arc<Connection>,
        sink: Arc<dyn SubscriptionSink>,
        poll_interval: Duration,
        on_lost: LossHandler,
    ) -> Result<Self> {
        let shared = Arc::new(LoopShared {
            stop: AtomicBool::new(false),
            exited: Mutex::new(false),
            exit_signal: Condvar::new(),
            reports: Mutex::new(LossReports::default()),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(connection, sink, poll_interval, thread_shared, on_lost))
            .map_err(|e| ClientError::Internal(format!("failed to spawn event loop: {}", e)))?;

        let thread = handle.thread().id();
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
            thread,
        })
    }

    /// Whether the loop thread is still inside its loop.
    pub fn is_running(&self) -> bool {
        !*self.shared.exited.lock()
    }

    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Hands a connection loss noticed on another thread to the loop, which
    /// runs the loss handler on its own thread within one poll interval.
    ///
    /// Returns `false` when the loop has already left and the caller must
    /// handle the loss itself. Only the first report is kept.
    pub fn report_loss(&self, err: ClientError) -> bool {
        let mut reports = self.shared.reports.lock();
        if reports.closed {
            return false;
        }
        reports.loss.get_or_insert(err);
        true
    }

    /// Stops the loop and waits for the thread to exit.
    ///
    /// Safe to call more than once.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        if self.is_loop_thread() {
            return;
        }

        {
            let mut exited = self.shared.exited.lock();
            while !*exited {
                self.shared.exit_signal.wait(&mut exited);
            }
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Event loop thread panicked");
            }
        }
    }
}

fn run(
    connection: Arc<Connection>,
    sink: Arc<dyn SubscriptionSink>,
    poll_interval: Duration,
    shared: Arc<LoopShared>,
    on_lost: LossHandler,
) {
    let _guard = ExitGuard(Arc::clone(&shared));
    info!(connection = connection.label(), "Event loop started");

    let mut on_lost = Some(on_lost);
    while !shared.stop.load(Ordering::Acquire) {
        if let Some(err) = shared.take_reported_loss() {
            debug!(connection = connection.label(), error = %err, "Handling reported loss");
            if let Some(handler) = on_lost.take() {
                handler(err);
            }
            break;
        }
        match connection.pump(poll_interval, Some(sink.as_ref())) {
            Ok(_) => {}
            Err(ClientError::NotConnected) => {
                debug!(connection = connection.label(), "Connection closed");
                break;
            }
            Err(e) => {
                if let Some(handler) = on_lost.take() {
                    handler(e);
                }
                break;
            }
        }
    }

    if let Some(err) = shared.close_reports() {
        if !shared.stop.load(Ordering::Acquire) {
            if let Some(handler) = on_lost.take() {
                handler(err);
            }
        }
    }

    info!(connection = connection.label(), "Event loop stopped");
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Outcome;
    use crate::testing::MockDaemon;
    use bridge_traits::transport::DaemonAddress;
    use core_protocol::{FrameCodec, RequestKind, SignalId, Value};
    use std::sync::mpsc;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(20);
    const WAIT: Duration = Duration::from_secs(2);

    struct ChannelSink(Mutex<mpsc::Sender<(SignalId, Outcome)>>);

    impl SubscriptionSink for ChannelSink {
        fn deliver(&self, signal: SignalId, outcome: Outcome) {
            let _ = self.0.lock().send((signal, outcome));
        }
    }

    fn setup() -> (MockDaemon, Arc<Connection>) {
        let daemon = MockDaemon::new();
        let conn = Connection::open(
            "async",
            &*daemon.connector(),
            &DaemonAddress::unix("/tmp/mock"),
            FrameCodec::default(),
        )
        .unwrap();
        (daemon, Arc::new(conn))
    }

    #[test]
    fn test_delivers_emissions_on_loop_thread() {
        let (daemon, conn) = setup();
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink(Mutex::new(tx)));

        let event_loop =
            EventLoop::spawn(Arc::clone(&conn), sink, POLL, Box::new(|_: ClientError| {})).unwrap();

        let id = conn.send_subscription(SignalId::PlaybackStatus).unwrap();
        daemon.reply(0, id, &Value::UInt(1));

        let (signal, outcome) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(signal, SignalId::PlaybackStatus);
        assert_eq!(outcome, Ok(Value::UInt(1)));

        event_loop.stop();
        assert!(!event_loop.is_running());
    }

    #[test]
    fn test_stop_returns_promptly() {
        let (_daemon, conn) = setup();
        let (tx, _rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink(Mutex::new(tx)));

        let event_loop = EventLoop::spawn(conn, sink, POLL, Box::new(|_: ClientError| {})).unwrap();
        assert!(event_loop.is_running());

        let started = Instant::now();
        event_loop.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!event_loop.is_running());

        // Second stop is a no-op
        event_loop.stop();
    }

    #[test]
    fn test_loss_handler_runs_once() {
        let (daemon, conn) = setup();
        let (tx, _rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink(Mutex::new(tx)));
        let (lost_tx, lost_rx) = mpsc::channel();

        let pending = conn.send(RequestKind::PlaybackStatus, &[]).unwrap();
        let event_loop = EventLoop::spawn(
            Arc::clone(&conn),
            sink,
            POLL,
            Box::new(move |err: ClientError| {
                let _ = lost_tx.send(err);
            }),
        )
        .unwrap();

        daemon.drop_link(0);

        let err = lost_rx.recv_timeout(WAIT).unwrap();
        assert!(err.is_connection_loss());
        assert!(matches!(
            pending.try_outcome(),
            Some(Err(ClientError::Connection(_)))
        ));

        event_loop.stop();
        assert!(lost_rx.try_recv().is_err());
    }

    #[test]
    fn test_reported_loss_runs_handler_on_loop_thread() {
        let (_daemon, conn) = setup();
        let (tx, _rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink(Mutex::new(tx)));
        let (lost_tx, lost_rx) = mpsc::channel();

        let event_loop = EventLoop::spawn(
            Arc::clone(&conn),
            sink,
            POLL,
            Box::new(move |err: ClientError| {
                let name = thread::current().name().map(str::to_string);
                let _ = lost_tx.send((name, err));
            }),
        )
        .unwrap();

        let err = ClientError::Connection("sync link dropped".to_string());
        assert!(event_loop.report_loss(err.clone()));

        let (name, reported) = lost_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(name.as_deref(), Some(THREAD_NAME));
        assert_eq!(reported, err);

        let deadline = Instant::now() + WAIT;
        while event_loop.is_running() {
            assert!(Instant::now() < deadline, "loop did not exit");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!event_loop.report_loss(err));
        assert!(lost_rx.try_recv().is_err());
    }

    #[test]
    fn test_report_after_stop_is_refused() {
        let (_daemon, conn) = setup();
        let (tx, _rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink(Mutex::new(tx)));

        let event_loop = EventLoop::spawn(conn, sink, POLL, Box::new(|_: ClientError| {})).unwrap();
        event_loop.stop();

        assert!(!event_loop.report_loss(ClientError::Cancelled));
    }

    #[test]
    fn test_exits_when_connection_closed() {
        let (_daemon, conn) = setup();
        let (tx, _rx) = mpsc::channel();
        let sink = Arc::new(ChannelSink(Mutex::new(tx)));

        let event_loop =
            EventLoop::spawn(Arc::clone(&conn), sink, POLL, Box::new(|_: ClientError| {})).unwrap();
        conn.close();

        let deadline = Instant::now() + WAIT;
        while event_loop.is_running() {
            assert!(Instant::now() < deadline, "loop did not exit");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
