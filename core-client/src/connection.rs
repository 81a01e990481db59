//! # Daemon Connection
//!
//! One transport to the daemon plus the requests waiting on it.
//!
//! ## Overview
//!
//! A [`Connection`] owns:
//!
//! - the transport and the inbound byte buffer (`io` lock)
//! - the id allocator, the pending-route map and the outbound buffer
//!   (`state` lock)
//! - a [`ResultDecoder`] whose single decode slot serialises streaming
//!   dictionary decodes on this connection
//!
//! Sending never blocks on the transport: the request is encoded into the
//! outbound buffer and written immediately when nobody is pumping, or by
//! the next [`Connection::pump`] otherwise.
//!
//! ## Routing
//!
//! Every inbound frame is matched to its route by cookie, in arrival order:
//!
//! | Route | On frame |
//! |-------|----------|
//! | Reply | completes the [`PendingResult`] and drops the route |
//! | Broadcast subscription | handed to the [`SubscriptionSink`]; route kept |
//! | Signal subscription | handed to the [`SubscriptionSink`]; route dropped |
//!
//! Frames without a route are logged and dropped.
//!
//! ## Lock order
//!
//! `io` before `state`. Completion callbacks and sink deliveries run with
//! `io` held and `state` released, so they may send on this connection.

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use bridge_traits::error::BridgeError;
use bridge_traits::transport::{DaemonAddress, Readiness, Transport, TransportConnector};
use core_protocol::{
    Frame, FrameCodec, IdAllocator, Reply, RequestId, RequestKind, ResultDecoder, SignalId,
    SubscriptionMode, Value,
};

use crate::error::{ClientError, Result};
use crate::result::{CompletionCallback, Outcome, PendingResult};

/// Size of one transport read.
const READ_CHUNK: usize = 16 * 1024;

/// Receiver of broadcast and signal emissions.
pub trait SubscriptionSink: Send + Sync {
    fn deliver(&self, signal: SignalId, outcome: Outcome);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
    Lost,
}

enum Route {
    Reply(PendingResult),
    Subscription(SignalId),
}

enum RouteAction {
    Keep(SignalId),
    Take,
    Missing,
}

struct State {
    status: Status,
    ids: IdAllocator,
    routes: HashMap<RequestId, Route>,
    outbox: BytesMut,
}

struct Io {
    transport: Option<Box<dyn Transport>>,
    inbox: BytesMut,
}

/// A framed, multiplexed connection to the daemon.
pub struct Connection {
    label: &'static str,
    peer: String,
    codec: FrameCodec,
    decoder: ResultDecoder,
    io: Mutex<Io>,
    state: Mutex<State>,
}

impl Connection {
    /// Opens a transport to `address`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Connection`] when the transport cannot be established.
    pub fn open(
        label: &'static str,
        connector: &dyn TransportConnector,
        address: &DaemonAddress,
        codec: FrameCodec,
    ) -> Result<Self> {
        let transport = connector.connect(address).map_err(|e| match e {
            BridgeError::InvalidAddress(msg) => ClientError::Config(msg),
            other => ClientError::Connection(other.to_string()),
        })?;
        Ok(Self::from_transport(label, transport, codec))
    }

    /// Wraps an already-open transport.
    pub fn from_transport(
        label: &'static str,
        transport: Box<dyn Transport>,
        codec: FrameCodec,
    ) -> Self {
        let peer = transport.peer();
        debug!(connection = label, peer = %peer, "Connection opened");
        Self {
            label,
            peer,
            codec,
            decoder: ResultDecoder::new(),
            io: Mutex::new(Io {
                transport: Some(transport),
                inbox: BytesMut::new(),
            }),
            state: Mutex::new(State {
                status: Status::Open,
                ids: IdAllocator::new(),
                routes: HashMap::new(),
                outbox: BytesMut::new(),
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().status == Status::Open
    }

    /// Number of requests and subscriptions waiting for a frame.
    pub fn pending_count(&self) -> usize {
        self.state.lock().routes.len()
    }

    /// Decoder used for replies on this connection.
    pub fn decoder(&self) -> &ResultDecoder {
        &self.decoder
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Queues a request and returns its pending result.
    pub fn send(&self, kind: RequestKind, args: &[Value]) -> Result<PendingResult> {
        self.send_reply(kind, args, None)
    }

    /// Queues a request whose completion runs `callback`.
    pub fn send_with_callback(
        &self,
        kind: RequestKind,
        args: &[Value],
        callback: CompletionCallback,
    ) -> Result<PendingResult> {
        self.send_reply(kind, args, Some(callback))
    }

    /// Queues a subscribe request; emissions go to the pump's sink.
    pub fn send_subscription(&self, signal: SignalId) -> Result<RequestId> {
        self.register(
            RequestKind::Subscribe(signal),
            &[Value::UInt(signal.id())],
            |_| Route::Subscription(signal),
        )
    }

    /// Drops the route of `id`; a late frame for it is discarded.
    pub fn forget(&self, id: RequestId) -> bool {
        self.state.lock().routes.remove(&id).is_some()
    }

    fn send_reply(
        &self,
        kind: RequestKind,
        args: &[Value],
        callback: Option<CompletionCallback>,
    ) -> Result<PendingResult> {
        let mut created = None;
        self.register(kind, args, |id| {
            let result = match callback {
                Some(callback) => PendingResult::with_callback(id, kind, callback),
                None => PendingResult::new(id, kind),
            };
            created = Some(result.clone());
            Route::Reply(result)
        })?;
        created.ok_or_else(|| ClientError::Internal("request was not registered".to_string()))
    }

    fn register(
        &self,
        kind: RequestKind,
        args: &[Value],
        route: impl FnOnce(RequestId) -> Route,
    ) -> Result<RequestId> {
        let id = {
            let mut state = self.state.lock();
            if state.status != Status::Open {
                return Err(ClientError::NotConnected);
            }

            let State {
                ids,
                routes,
                outbox,
                ..
            } = &mut *state;
            let id = ids
                .allocate(|id| routes.contains_key(&id))
                .ok_or_else(|| ClientError::Internal("request ids exhausted".to_string()))?;
            self.codec.encode_request(kind, id, args, outbox)?;
            routes.insert(id, route(id));
            id
        };

        trace!(connection = self.label, request_id = %id, ?kind, "Request queued");

        if let Some(mut io) = self.io.try_lock() {
            if let Err(e) = self.flush(&mut io) {
                // The next pump reports the failure
                debug!(connection = self.label, error = %e, "Write deferred");
            }
        }
        Ok(id)
    }

    fn flush(&self, io: &mut Io) -> Result<()> {
        let transport = io.transport.as_mut().ok_or(ClientError::NotConnected)?;

        let chunk = {
            let mut state = self.state.lock();
            if state.outbox.is_empty() {
                return Ok(());
            }
            state.outbox.split().freeze()
        };

        let mut written = 0;
        let outcome = loop {
            if written == chunk.len() {
                break Ok(());
            }
            match transport.write(&chunk[written..]) {
                Ok(0) => break Ok(()),
                Ok(n) => written += n,
                Err(e) => break Err(ClientError::from(e)),
            }
        };

        if written < chunk.len() {
            let mut state = self.state.lock();
            let mut rest = BytesMut::from(&chunk[written..]);
            rest.unsplit(std::mem::take(&mut state.outbox));
            state.outbox = rest;
        }
        outcome
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Flushes queued requests, waits up to `timeout` for inbound data and
    /// routes every complete frame.
    ///
    /// Returns the number of frames routed.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NotConnected`] once the connection was closed
    /// - [`ClientError::Connection`] when the transport fails; every pending
    ///   result has then been completed with the same error
    pub fn pump(&self, timeout: Duration, sink: Option<&dyn SubscriptionSink>) -> Result<usize> {
        let mut io = self.io.lock();
        self.pump_locked(&mut io, timeout, sink)
    }

    fn pump_locked(
        &self,
        io: &mut Io,
        timeout: Duration,
        sink: Option<&dyn SubscriptionSink>,
    ) -> Result<usize> {
        if !self.is_open() {
            self.release_transport(io);
            return Err(ClientError::NotConnected);
        }

        if let Err(e) = self.flush(io) {
            return Err(self.lost(io, e));
        }
        if let Err(e) = self.receive(io, timeout) {
            return Err(self.lost(io, e));
        }

        let mut routed = 0;
        loop {
            let frame = match self.codec.decode(&mut io.inbox) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return Err(self.lost(io, e.into())),
            };
            self.route(frame, sink);
            routed += 1;
        }

        if !self.is_open() {
            self.release_transport(io);
            return Ok(routed);
        }

        // Requests queued by callbacks leave in the same turn
        if let Err(e) = self.flush(io) {
            return Err(self.lost(io, e));
        }
        Ok(routed)
    }

    fn receive(&self, io: &mut Io, timeout: Duration) -> Result<()> {
        let Io { transport, inbox } = io;
        let transport = transport.as_mut().ok_or(ClientError::NotConnected)?;

        match transport.wait_readable(timeout)? {
            Readiness::Idle => return Ok(()),
            Readiness::Closed => {
                return Err(ClientError::Connection(
                    "daemon closed the connection".to_string(),
                ))
            }
            Readiness::Ready => {}
        }

        let mut buf = [0u8; READ_CHUNK];
        loop {
            match transport.read(&mut buf) {
                Ok(0) => {
                    return Err(ClientError::Connection(
                        "daemon closed the connection".to_string(),
                    ))
                }
                Ok(n) => {
                    inbox.extend_from_slice(&buf[..n]);
                    if n < buf.len() {
                        return Ok(());
                    }
                }
                Err(BridgeError::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn route(&self, frame: Frame, sink: Option<&dyn SubscriptionSink>) {
        let id = frame.request_id();

        let route = {
            let mut state = self.state.lock();
            let action = match state.routes.get(&id) {
                Some(Route::Subscription(signal))
                    if signal.mode() == SubscriptionMode::Broadcast =>
                {
                    RouteAction::Keep(*signal)
                }
                Some(_) => RouteAction::Take,
                None => RouteAction::Missing,
            };
            match action {
                RouteAction::Keep(signal) => Some(Route::Subscription(signal)),
                RouteAction::Take => state.routes.remove(&id),
                RouteAction::Missing => None,
            }
        };

        let Some(route) = route else {
            warn!(
                connection = self.label,
                request_id = %id,
                command = frame.command,
                "Dropping frame for unknown request"
            );
            return;
        };

        let outcome = self.decode(&frame);
        match route {
            Route::Reply(result) => {
                debug!(
                    connection = self.label,
                    request_id = %id,
                    ok = outcome.is_ok(),
                    "Reply routed"
                );
                result.complete(outcome);
            }
            Route::Subscription(signal) => match sink {
                Some(sink) => {
                    debug!(connection = self.label, %signal, "Emission routed");
                    sink.deliver(signal, outcome);
                }
                None => warn!(
                    connection = self.label,
                    %signal,
                    "Dropping emission: no subscription sink"
                ),
            },
        }
    }

    fn decode(&self, frame: &Frame) -> Outcome {
        match self.decoder.decode(frame) {
            Ok(Reply::Value(value)) => Ok(value),
            Ok(Reply::DaemonError(message)) => Err(ClientError::Protocol(message)),
            Err(e) => {
                warn!(
                    connection = self.label,
                    request_id = %frame.request_id(),
                    error = %e,
                    "Malformed reply"
                );
                Err(ClientError::Decode(e))
            }
        }
    }

    // ========================================================================
    // Blocking wait
    // ========================================================================

    /// Drives this connection from the calling thread until `result`
    /// completes or `timeout` elapses.
    ///
    /// When another thread is already pumping, the caller parks on the
    /// result instead. On timeout the route is dropped and the result is
    /// completed with [`ClientError::Timeout`].
    pub fn wait_for(
        &self,
        result: &PendingResult,
        timeout: Option<Duration>,
        poll: Duration,
    ) -> Outcome {
        let deadline = timeout.map(|limit| (Instant::now() + limit, limit));

        loop {
            if let Some(outcome) = result.try_outcome() {
                return outcome;
            }

            let slice = match deadline {
                Some((deadline, limit)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.forget(result.id());
                        let err = ClientError::Timeout(limit);
                        result.complete(Err(err.clone()));
                        return result.try_outcome().unwrap_or(Err(err));
                    }
                    (deadline - now).min(poll)
                }
                None => poll,
            };

            match self.io.try_lock() {
                Some(mut io) => {
                    if let Err(e) = self.pump_locked(&mut io, slice, None) {
                        drop(io);
                        return result.try_outcome().unwrap_or(Err(e));
                    }
                }
                None => {
                    result.wait(Some(slice));
                }
            }
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Closes the connection and fails every pending result with
    /// [`ClientError::Cancelled`]. Returns how many were cancelled.
    ///
    /// Nothing is sent to the daemon.
    pub fn close(&self) -> usize {
        let routes = {
            let mut state = self.state.lock();
            if state.status != Status::Open {
                return 0;
            }
            state.status = Status::Closed;
            state.outbox.clear();
            std::mem::take(&mut state.routes)
        };

        // A pump in progress releases the transport once it sees the status
        if let Some(mut io) = self.io.try_lock() {
            self.release_transport(&mut io);
        }

        let cancelled = fail_routes(routes, &ClientError::Cancelled);
        info!(connection = self.label, cancelled, "Connection closed");
        cancelled
    }

    fn lost(&self, io: &mut Io, err: ClientError) -> ClientError {
        let routes = {
            let mut state = self.state.lock();
            if state.status != Status::Open {
                drop(state);
                self.release_transport(io);
                return ClientError::NotConnected;
            }
            state.status = Status::Lost;
            state.outbox.clear();
            std::mem::take(&mut state.routes)
        };

        let err = match err {
            ClientError::Connection(_) => err,
            other => ClientError::Connection(other.to_string()),
        };
        error!(connection = self.label, peer = %self.peer, error = %err, "Connection lost");

        self.release_transport(io);
        fail_routes(routes, &err);
        err
    }

    fn release_transport(&self, io: &mut Io) {
        io.inbox.clear();
        if let Some(mut transport) = io.transport.take() {
            if let Err(e) = transport.shutdown() {
                debug!(connection = self.label, error = %e, "Transport shutdown failed");
            }
        }
    }
}

fn fail_routes(routes: HashMap<RequestId, Route>, err: &ClientError) -> usize {
    let mut pending: Vec<_> = routes
        .into_iter()
        .filter_map(|(id, route)| match route {
            Route::Reply(result) => Some((id, result)),
            Route::Subscription(_) => None,
        })
        .collect();
    pending.sort_by_key(|(id, _)| *id);

    for (_, result) in &pending {
        result.complete(Err(err.clone()));
    }
    pending.len()
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Connection")
            .field("label", &self.label)
            .field("peer", &self.peer)
            .field("status", &state.status)
            .field("pending", &state.routes.len())
            .field("next_id", &state.ids.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDaemon;
    use core_protocol::Dict;
    use std::sync::Arc;

    const POLL: Duration = Duration::from_millis(5);
    const WAIT: Duration = Duration::from_secs(2);

    fn connect(daemon: &MockDaemon) -> Connection {
        let address = DaemonAddress::unix("/tmp/mock");
        Connection::open("test", &*daemon.connector(), &address, FrameCodec::default()).unwrap()
    }

    fn pump_until(conn: &Connection, sink: Option<&dyn SubscriptionSink>, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached");
            conn.pump(POLL, sink).unwrap();
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: parking_lot::Mutex<Vec<(SignalId, Outcome)>>,
    }

    impl SubscriptionSink for RecordingSink {
        fn deliver(&self, signal: SignalId, outcome: Outcome) {
            self.seen.lock().push((signal, outcome));
        }
    }

    #[test]
    fn test_ids_increase() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);

        let a = conn.send(RequestKind::PlaybackStatus, &[]).unwrap();
        let b = conn.send(RequestKind::PlaybackCurrentId, &[]).unwrap();
        assert!(b.id() > a.id());
        assert_eq!(conn.pending_count(), 2);
    }

    #[test]
    fn test_reply_completes_result() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);

        let result = conn.send(RequestKind::PlaybackStatus, &[]).unwrap();
        daemon.reply(0, result.id(), &Value::UInt(1));

        pump_until(&conn, None, || result.is_complete());
        assert_eq!(result.try_outcome(), Some(Ok(Value::UInt(1))));
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn test_daemon_error_becomes_protocol_error() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);

        let result = conn.send(RequestKind::ConfigGet, &[Value::from("nope")]).unwrap();
        daemon.error(0, result.id(), "Trying to get nonexistent config value");

        pump_until(&conn, None, || result.is_complete());
        assert_eq!(
            result.try_outcome(),
            Some(Err(ClientError::Protocol(
                "Trying to get nonexistent config value".to_string()
            )))
        );
    }

    #[test]
    fn test_malformed_reply_does_not_stop_later_frames() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);

        let bad = conn.send(RequestKind::PlaybackStatus, &[]).unwrap();
        let good = conn.send(RequestKind::PlaybackCurrentId, &[]).unwrap();

        daemon.send_frame(0, Frame::new(0, 2, bad.id().0, vec![0, 0, 0, 99]));
        daemon.reply(0, good.id(), &Value::UInt(5));

        pump_until(&conn, None, || good.is_complete());
        assert!(matches!(
            bad.try_outcome(),
            Some(Err(ClientError::Decode(_)))
        ));
        assert_eq!(good.try_outcome(), Some(Ok(Value::UInt(5))));
        assert!(conn.is_open());
    }

    #[test]
    fn test_broadcast_route_persists() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);
        let sink = RecordingSink::default();

        let id = conn.send_subscription(SignalId::PlaybackStatus).unwrap();
        for status in 0..3 {
            daemon.reply(0, id, &Value::UInt(status));
        }

        pump_until(&conn, Some(&sink), || sink.seen.lock().len() == 3);
        assert_eq!(conn.pending_count(), 1);
    }

    #[test]
    fn test_signal_route_fires_once() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);
        let sink = RecordingSink::default();

        let id = conn.send_subscription(SignalId::PlaybackPlaytime).unwrap();
        daemon.reply(0, id, &Value::UInt(1000));
        daemon.reply(0, id, &Value::UInt(2000));

        pump_until(&conn, Some(&sink), || conn.pending_count() == 0);
        // Drain whatever else arrived
        conn.pump(POLL, Some(&sink)).unwrap();

        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (SignalId::PlaybackPlaytime, Ok(Value::UInt(1000))));
    }

    #[test]
    fn test_close_cancels_pending() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);

        let results: Vec<_> = (0..3)
            .map(|_| conn.send(RequestKind::PlaybackStatus, &[]).unwrap())
            .collect();
        conn.send_subscription(SignalId::PlaylistChanged).unwrap();

        assert_eq!(conn.close(), 3);
        for result in &results {
            assert_eq!(result.try_outcome(), Some(Err(ClientError::Cancelled)));
        }
        assert_eq!(conn.close(), 0);
        assert!(matches!(
            conn.send(RequestKind::PlaybackStatus, &[]),
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(conn.pump(POLL, None), Err(ClientError::NotConnected)));
    }

    #[test]
    fn test_transport_loss_fails_pending_with_connection_error() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);

        let result = conn.send(RequestKind::PlaybackStatus, &[]).unwrap();
        daemon.drop_link(0);

        let err = conn.pump(WAIT, None).unwrap_err();
        assert!(err.is_connection_loss());
        assert!(matches!(
            result.try_outcome(),
            Some(Err(ClientError::Connection(_)))
        ));
        assert!(!conn.is_open());
    }

    #[test]
    fn test_wait_for_pumps_until_reply() {
        let daemon = MockDaemon::new();
        daemon.respond(RequestKind::ConfigList, Value::Dict(Dict::from_iter([("a", "b")])));
        let conn = connect(&daemon);

        let result = conn.send(RequestKind::ConfigList, &[]).unwrap();
        let outcome = conn.wait_for(&result, Some(WAIT), POLL);
        assert_eq!(
            outcome,
            Ok(Value::Dict(Dict::from_iter([("a", "b")])))
        );
    }

    #[test]
    fn test_wait_for_times_out_and_forgets() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);

        let result = conn.send(RequestKind::PlaybackStatus, &[]).unwrap();
        let outcome = conn.wait_for(&result, Some(Duration::from_millis(30)), POLL);
        assert_eq!(outcome, Err(ClientError::Timeout(Duration::from_millis(30))));
        assert_eq!(conn.pending_count(), 0);

        // A late reply is dropped without completing anything twice
        daemon.reply(0, result.id(), &Value::UInt(1));
        conn.pump(POLL, None).unwrap();
        assert_eq!(
            result.try_outcome(),
            Some(Err(ClientError::Timeout(Duration::from_millis(30))))
        );
    }

    #[test]
    fn test_waiters_share_one_pump() {
        let daemon = MockDaemon::new();
        daemon.respond(RequestKind::PlaybackStatus, Value::UInt(2));
        let conn = Arc::new(connect(&daemon));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let conn = Arc::clone(&conn);
                std::thread::spawn(move || {
                    let result = conn.send(RequestKind::PlaybackStatus, &[]).unwrap();
                    conn.wait_for(&result, Some(WAIT), POLL)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(Value::UInt(2)));
        }
    }
}
