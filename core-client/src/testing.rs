//! # Test Support
//!
//! Scripted in-memory daemon for exercising the engine without sockets.
//!
//! ## Overview
//!
//! - [`MockDaemon`] - records every request it receives and lets a test
//!   inject replies, daemon errors, broadcast and signal emissions, raw
//!   bytes, or a dropped link
//! - [`MockConnector`] - [`TransportConnector`] opening a new link on the
//!   daemon per `connect`
//! - [`MockTransport`] - the client end of one link
//!
//! Links are numbered in connect order. A dispatcher opens its async
//! connection first ([`ASYNC_LINK`]) and its blocking one second
//! ([`SYNC_LINK`]).
//!
//! Scripted responses ([`MockDaemon::respond`]) answer every matching
//! request as soon as it is written. `HELLO` is answered with the protocol
//! version out of the box.
//!
//! ## Usage
//!
//! ```ignore
//! use core_client::testing::MockDaemon;
//! use core_protocol::{RequestKind, Value};
//!
//! let daemon = MockDaemon::new();
//! daemon.respond(RequestKind::PlaybackStatus, Value::UInt(1));
//! let connector = daemon.connector();
//! # let _ = connector;
//! ```

use bytes::{Buf, BytesMut};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_traits::error::{BridgeError, Result};
use bridge_traits::transport::{DaemonAddress, Readiness, Transport, TransportConnector};
use core_protocol::{
    Frame, FrameCodec, RequestId, RequestKind, Value, PROTOCOL_VERSION,
};

/// Link index of a dispatcher's async connection.
pub const ASYNC_LINK: usize = 0;

/// Link index of a dispatcher's blocking connection.
pub const SYNC_LINK: usize = 1;

#[derive(Default)]
struct Link {
    to_client: BytesMut,
    from_client: BytesMut,
    requests: Vec<Frame>,
    lost: bool,
    shut: bool,
}

enum Scripted {
    Value(Value),
    Error(String),
}

struct DaemonState {
    links: Vec<Link>,
    scripted: HashMap<(u32, u32), Scripted>,
    refuse: bool,
}

struct Shared {
    state: Mutex<DaemonState>,
    changed: Condvar,
    codec: FrameCodec,
}

/// In-memory daemon shared by every link it accepts.
#[derive(Clone)]
pub struct MockDaemon {
    shared: Arc<Shared>,
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDaemon {
    pub fn new() -> Self {
        let mut scripted = HashMap::new();
        scripted.insert(
            RequestKind::Hello.wire(),
            Scripted::Value(Value::UInt(PROTOCOL_VERSION)),
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(DaemonState {
                    links: Vec::new(),
                    scripted,
                    refuse: false,
                }),
                changed: Condvar::new(),
                codec: FrameCodec::default(),
            }),
        }
    }

    /// Connector opening links on this daemon.
    pub fn connector(&self) -> Arc<MockConnector> {
        Arc::new(MockConnector {
            daemon: self.clone(),
        })
    }

    // ========================================================================
    // Scripting
    // ========================================================================

    /// Answers every request of `kind` with `value`.
    pub fn respond(&self, kind: RequestKind, value: Value) {
        self.shared
            .state
            .lock()
            .scripted
            .insert(kind.wire(), Scripted::Value(value));
    }

    /// Answers every request of `kind` with a daemon error.
    pub fn respond_error(&self, kind: RequestKind, message: impl Into<String>) {
        self.shared
            .state
            .lock()
            .scripted
            .insert(kind.wire(), Scripted::Error(message.into()));
    }

    /// Stops answering requests of `kind` automatically.
    pub fn forget_response(&self, kind: RequestKind) {
        self.shared.state.lock().scripted.remove(&kind.wire());
    }

    /// Makes further connects fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.state.lock().refuse = refuse;
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Number of links accepted so far.
    pub fn link_count(&self) -> usize {
        self.shared.state.lock().links.len()
    }

    /// Whether the client shut its end of `link` down.
    pub fn is_shut(&self, link: usize) -> bool {
        self.shared
            .state
            .lock()
            .links
            .get(link)
            .map_or(false, |l| l.shut)
    }

    /// Requests received on `link`, in order.
    pub fn requests(&self, link: usize) -> Vec<Frame> {
        self.shared
            .state
            .lock()
            .links
            .get(link)
            .map(|l| l.requests.clone())
            .unwrap_or_default()
    }

    /// Waits until `count` requests matching `kind` arrived on `link` and
    /// returns their ids, oldest first.
    ///
    /// A subscribe kind only matches requests for its own signal. Returns
    /// fewer ids if `timeout` elapses first.
    pub fn wait_for_requests(
        &self,
        link: usize,
        kind: RequestKind,
        count: usize,
        timeout: Duration,
    ) -> Vec<RequestId> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            let ids: Vec<RequestId> = state
                .links
                .get(link)
                .map(|l| {
                    l.requests
                        .iter()
                        .filter(|frame| matches_kind(frame, kind))
                        .map(Frame::request_id)
                        .collect()
                })
                .unwrap_or_default();

            if ids.len() >= count {
                return ids;
            }
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return ids;
            }
        }
    }

    /// Waits for the first request of `kind` on `link`.
    pub fn wait_for_request(
        &self,
        link: usize,
        kind: RequestKind,
        timeout: Duration,
    ) -> Option<RequestId> {
        self.wait_for_requests(link, kind, 1, timeout)
            .first()
            .copied()
    }

    // ========================================================================
    // Injection
    // ========================================================================

    /// Sends a successful reply (or emission) for `id` on `link`.
    pub fn reply(&self, link: usize, id: RequestId, value: &Value) {
        let frame = Frame::reply(id, value).expect("value must be encodable");
        self.send_frame(link, frame);
    }

    /// Sends a daemon error for `id` on `link`.
    pub fn error(&self, link: usize, id: RequestId, message: &str) {
        self.send_frame(link, Frame::error(id, message));
    }

    pub fn send_frame(&self, link: usize, frame: Frame) {
        self.send_raw(link, &frame.to_bytes());
    }

    /// Queues raw bytes for the client end of `link`.
    pub fn send_raw(&self, link: usize, bytes: &[u8]) {
        let mut state = self.shared.state.lock();
        if let Some(l) = state.links.get_mut(link) {
            l.to_client.extend_from_slice(bytes);
        }
        self.shared.changed.notify_all();
    }

    /// Drops `link` from the daemon side, as if the daemon went away.
    pub fn drop_link(&self, link: usize) {
        let mut state = self.shared.state.lock();
        if let Some(l) = state.links.get_mut(link) {
            l.lost = true;
        }
        self.shared.changed.notify_all();
    }

    /// Waits until at least `count` links were accepted.
    pub fn wait_for_links(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.links.len() < count {
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return state.links.len() >= count;
            }
        }
        true
    }
}

impl fmt::Debug for MockDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDaemon")
            .field("links", &self.link_count())
            .finish()
    }
}

fn matches_kind(frame: &Frame, kind: RequestKind) -> bool {
    if (frame.object, frame.command) != kind.wire() {
        return false;
    }
    match kind {
        RequestKind::Subscribe(signal) => {
            frame.payload.len() >= 4 && (&frame.payload[..4]).get_u32() == signal.id()
        }
        _ => true,
    }
}

// ============================================================================
// Connector and transport
// ============================================================================

/// Opens links on a [`MockDaemon`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    daemon: MockDaemon,
}

impl MockConnector {
    pub fn daemon(&self) -> &MockDaemon {
        &self.daemon
    }
}

impl TransportConnector for MockConnector {
    fn connect(&self, address: &DaemonAddress) -> Result<Box<dyn Transport>> {
        let shared = &self.daemon.shared;
        let mut state = shared.state.lock();
        if state.refuse {
            return Err(BridgeError::ConnectionFailed(format!(
                "{}: connection refused",
                address
            )));
        }
        state.links.push(Link::default());
        let link = state.links.len() - 1;
        shared.changed.notify_all();

        Ok(Box::new(MockTransport {
            shared: Arc::clone(shared),
            link,
        }))
    }

    fn default_address(&self) -> Option<DaemonAddress> {
        Some(DaemonAddress::unix("/tmp/xmms-ipc-mock"))
    }
}

/// Client end of one mock link.
pub struct MockTransport {
    shared: Arc<Shared>,
    link: usize,
}

impl MockTransport {
    fn closed(&self) -> BridgeError {
        BridgeError::Closed(self.peer())
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("link", &self.link)
            .finish()
    }
}

impl Transport for MockTransport {
    fn wait_readable(&mut self, timeout: Duration) -> Result<Readiness> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            let link = &state.links[self.link];
            if link.shut {
                return Err(self.closed());
            }
            if !link.to_client.is_empty() {
                return Ok(Readiness::Ready);
            }
            if link.lost {
                return Ok(Readiness::Closed);
            }
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                let link = &state.links[self.link];
                if link.to_client.is_empty() && !link.lost {
                    return Ok(Readiness::Idle);
                }
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.shared.state.lock();
        let link = &mut state.links[self.link];
        if link.shut {
            return Err(self.closed());
        }
        if link.to_client.is_empty() {
            if link.lost {
                return Ok(0);
            }
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no data available",
            )));
        }
        let n = buf.len().min(link.to_client.len());
        buf[..n].copy_from_slice(&link.to_client[..n]);
        link.to_client.advance(n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut guard = self.shared.state.lock();
        let DaemonState {
            links, scripted, ..
        } = &mut *guard;
        let link = &mut links[self.link];
        if link.shut {
            return Err(self.closed());
        }
        if link.lost {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "daemon went away",
            )));
        }

        link.from_client.extend_from_slice(buf);
        loop {
            let frame = match self.shared.codec.decode(&mut link.from_client) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    return Err(BridgeError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        e.to_string(),
                    )))
                }
            };

            let response = match scripted.get(&(frame.object, frame.command)) {
                Some(Scripted::Value(value)) => Frame::reply(frame.request_id(), value).ok(),
                Some(Scripted::Error(message)) => Some(Frame::error(frame.request_id(), message)),
                None => None,
            };
            if let Some(response) = response {
                link.to_client.extend_from_slice(&response.to_bytes());
            }
            link.requests.push(frame);
        }

        self.shared.changed.notify_all();
        Ok(buf.len())
    }

    fn shutdown(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        let link = &mut state.links[self.link];
        if link.shut {
            return Err(self.closed());
        }
        link.shut = true;
        self.shared.changed.notify_all();
        Ok(())
    }

    fn peer(&self) -> String {
        format!("mock://link/{}", self.link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_protocol::SignalId;

    fn request(kind: RequestKind, id: u32, args: &[Value]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        FrameCodec::default()
            .encode_request(kind, RequestId(id), args, &mut buf)
            .unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_scripted_response() {
        let daemon = MockDaemon::new();
        daemon.respond(RequestKind::PlaybackStatus, Value::UInt(1));
        let mut transport = daemon
            .connector()
            .connect(&DaemonAddress::unix("/tmp/x"))
            .unwrap();

        transport
            .write(&request(RequestKind::PlaybackStatus, 9, &[]))
            .unwrap();
        assert_eq!(
            transport.wait_readable(Duration::from_millis(50)).unwrap(),
            Readiness::Ready
        );

        let mut buf = [0u8; 64];
        let n = transport.read(&mut buf).unwrap();
        let mut bytes = BytesMut::from(&buf[..n]);
        let frame = FrameCodec::default().decode(&mut bytes).unwrap().unwrap();
        assert_eq!(frame.cookie, 9);
        assert_eq!(daemon.requests(0).len(), 1);
    }

    #[test]
    fn test_subscription_matching_uses_signal() {
        let daemon = MockDaemon::new();
        let mut transport = daemon
            .connector()
            .connect(&DaemonAddress::unix("/tmp/x"))
            .unwrap();

        let signal = SignalId::PlaybackStatus;
        transport
            .write(&request(
                RequestKind::Subscribe(signal),
                3,
                &[Value::UInt(signal.id())],
            ))
            .unwrap();

        let other = RequestKind::Subscribe(SignalId::PlaylistChanged);
        assert_eq!(
            daemon.wait_for_request(0, RequestKind::Subscribe(signal), Duration::ZERO),
            Some(RequestId(3))
        );
        assert_eq!(daemon.wait_for_request(0, other, Duration::ZERO), None);
    }

    #[test]
    fn test_idle_then_lost() {
        let daemon = MockDaemon::new();
        let mut transport = daemon
            .connector()
            .connect(&DaemonAddress::unix("/tmp/x"))
            .unwrap();

        assert_eq!(
            transport.wait_readable(Duration::from_millis(5)).unwrap(),
            Readiness::Idle
        );
        daemon.drop_link(0);
        assert_eq!(
            transport.wait_readable(Duration::from_millis(5)).unwrap(),
            Readiness::Closed
        );
        assert!(transport.write(b"x").is_err());
    }

    #[test]
    fn test_refused_connection() {
        let daemon = MockDaemon::new();
        daemon.refuse_connections(true);
        let result = daemon.connector().connect(&DaemonAddress::unix("/tmp/x"));
        assert!(matches!(result, Err(BridgeError::ConnectionFailed(_))));
    }
}
