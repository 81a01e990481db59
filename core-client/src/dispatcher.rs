//! # Dispatcher
//!
//! Client handle owning both daemon connections, the event loop, the
//! subscription registry and the observers.
//!
//! ## Overview
//!
//! A dispatcher talks to the daemon over two connections:
//!
//! - the **async** connection, driven by the [`EventLoop`] thread, carries
//!   every request issued with [`Dispatcher::issue`] and every subscription.
//!   Completions are routed into typed [`ClientEvent`]s and handed to
//!   observers on the loop thread;
//! - the **sync** connection serves [`Dispatcher::issue_and_wait`] and is
//!   driven by the waiting caller, so a blocking call never stalls event
//!   delivery.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ──connect──> Connecting ──> Connected
//!       ^                        │             │
//!       └──── failure ───────────┘             │ disconnect / transport loss
//!       └──────────────────────────────────────┘
//! ```
//!
//! On connect every wanted subscription is re-established. A transport
//! failure emits [`ClientEvent::ConnectionLost`] and leaves the client
//! disconnected; reconnecting is up to the caller.
//!
//! `connect` and `disconnect` must not be called from an observer.
//!
//! ## Usage
//!
//! ```ignore
//! use core_client::Dispatcher;
//! use core_protocol::RequestKind;
//! use core_runtime::config::ClientConfig;
//!
//! let dispatcher = Dispatcher::new(ClientConfig::builder().build()?)?;
//! dispatcher.connect()?;
//! dispatcher.enable_broadcasts()?;
//!
//! let status = dispatcher.issue_and_wait(RequestKind::PlaybackStatus, &[])?;
//! ```

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

use bridge_traits::transport::DaemonAddress;
use core_protocol::{FrameCodec, RequestId, RequestKind, SignalId, Value, PROTOCOL_VERSION};
use core_runtime::config::ClientConfig;
use core_runtime::events::{ClientEvent, ConnectionState, EventBus, EventOrigin, Receiver};

use crate::connection::{Connection, SubscriptionSink};
use crate::error::{ClientError, Result};
use crate::event_loop::EventLoop;
use crate::observer::{Observer, ObserverId, ObserverSet};
use crate::result::Outcome;
use crate::routing::{self, Routed};
use crate::subscription::SubscriptionRegistry;

const ASYNC_LABEL: &str = "async";
const SYNC_LABEL: &str = "sync";

/// Client handle for one daemon.
///
/// Dropping the dispatcher disconnects it.
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    bus: EventBus,
    observers: ObserverSet,
    registry: SubscriptionRegistry,
    state: RwLock<ConnectionState>,
    async_conn: RwLock<Option<Arc<Connection>>>,
    sync_conn: RwLock<Option<Arc<Connection>>>,
    event_loop: Mutex<Option<EventLoop>>,
    lifecycle: Mutex<()>,
    broadcasts: AtomicBool,
}

/// Hands emissions from the loop thread to the dispatcher.
struct EmissionSink(Weak<Inner>);

impl SubscriptionSink for EmissionSink {
    fn deliver(&self, signal: SignalId, outcome: Outcome) {
        if let Some(inner) = self.0.upgrade() {
            inner.on_emission(signal, &outcome);
        }
    }
}

impl Dispatcher {
    /// Creates a disconnected dispatcher.
    ///
    /// # Errors
    ///
    /// [`ClientError::Config`] when `config` fails validation.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let bus = EventBus::new(config.event_buffer_size);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                bus,
                observers: ObserverSet::new(),
                registry: SubscriptionRegistry::new(),
                state: RwLock::new(ConnectionState::Disconnected),
                async_conn: RwLock::new(None),
                sync_conn: RwLock::new(None),
                event_loop: Mutex::new(None),
                lifecycle: Mutex::new(()),
                broadcasts: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Opens both connections, greets the daemon and starts the event loop.
    ///
    /// Does nothing when already connected.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Config`] if no daemon address can be resolved
    /// - [`ClientError::Connection`] if a transport cannot be opened
    /// - [`ClientError::Protocol`] if the daemon rejects the handshake
    #[instrument(skip(self), fields(client = %self.inner.config.client_name))]
    pub fn connect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock();
        if self.state() == ConnectionState::Connected {
            debug!("Already connected");
            return Ok(());
        }

        // A loop left behind by a lost connection has exited already
        self.inner.stop_loop();
        self.inner.set_state(ConnectionState::Connecting);

        let result = self.inner.establish().and_then(|address| {
            if self
                .inner
                .transition(ConnectionState::Connecting, ConnectionState::Connected)
            {
                Ok(address)
            } else {
                Err(ClientError::Connection(
                    "connection lost during handshake".to_string(),
                ))
            }
        });

        match result {
            Ok(address) => {
                info!(address = %address, "Connected to daemon");
                self.inner.emit(ClientEvent::Connected {
                    client_name: self.inner.config.client_name.clone(),
                    address: address.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
                self.inner.teardown();
                self.inner.set_state(ConnectionState::Disconnected);
                self.inner
                    .emit(routing::error_event(EventOrigin::Local, &e));
                Err(e)
            }
        }
    }

    /// Stops the event loop and closes both connections.
    ///
    /// Pending requests complete with [`ClientError::Cancelled`]. Wanted
    /// subscriptions are kept for the next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock();
        self.inner.shutdown();
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Queues `kind` on the async connection and returns its id at once.
    ///
    /// The completion reaches observers as a typed event whose origin
    /// carries the returned id; failures arrive as [`ClientEvent::Error`].
    pub fn issue(&self, kind: RequestKind, args: &[Value]) -> Result<RequestId> {
        self.inner.issue(kind, args)
    }

    /// Sends `kind` on the sync connection and waits for its reply, bounded
    /// by the configured sync timeout.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Protocol`] when the daemon reports an error
    /// - [`ClientError::Timeout`] when no reply arrives in time
    /// - [`ClientError::Connection`] when the transport fails
    pub fn issue_and_wait(&self, kind: RequestKind, args: &[Value]) -> Result<Value> {
        self.issue_and_wait_timeout(kind, args, self.inner.config.sync_timeout)
    }

    /// Like [`issue_and_wait`](Self::issue_and_wait) with an explicit
    /// timeout; `None` waits indefinitely.
    pub fn issue_and_wait_timeout(
        &self,
        kind: RequestKind,
        args: &[Value],
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let conn = self
            .inner
            .sync_connection()
            .ok_or(ClientError::NotConnected)?;
        let pending = conn.send(kind, args)?;
        trace!(request_id = %pending.id(), ?kind, "Waiting for reply");

        let outcome = conn.wait_for(&pending, timeout, self.inner.config.poll_interval);
        if let Err(e) = &outcome {
            if e.is_connection_loss() && !conn.is_open() {
                self.inner.connection_lost(e.clone());
            }
        }
        outcome
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribes the default broadcasts and signals.
    ///
    /// When disconnected they are established by the next connect.
    pub fn enable_broadcasts(&self) -> Result<()> {
        self.inner.broadcasts.store(true, Ordering::Release);
        for signal in SignalId::DEFAULT_SUBSCRIPTIONS {
            self.subscribe(signal)?;
        }
        info!(
            count = SignalId::DEFAULT_SUBSCRIPTIONS.len(),
            "Broadcasts enabled"
        );
        Ok(())
    }

    /// Drops every subscription, including ones added with
    /// [`subscribe`](Self::subscribe).
    pub fn disable_broadcasts(&self) {
        self.inner.broadcasts.store(false, Ordering::Release);
        let conn = self.inner.async_connection();
        self.inner.registry.clear(conn.as_deref());
        info!("Broadcasts disabled");
    }

    pub fn broadcasts_enabled(&self) -> bool {
        self.inner.broadcasts.load(Ordering::Acquire)
    }

    /// Subscribes to one broadcast or signal.
    pub fn subscribe(&self, signal: SignalId) -> Result<()> {
        match self.inner.async_connection() {
            Some(conn) => self.inner.registry.subscribe(&conn, signal).map(|_| ()),
            None => {
                self.inner.registry.want(signal);
                Ok(())
            }
        }
    }

    pub fn unsubscribe(&self, signal: SignalId) -> bool {
        let conn = self.inner.async_connection();
        self.inner.registry.unsubscribe(conn.as_deref(), signal)
    }

    /// Signals restored on every connect.
    pub fn subscriptions(&self) -> Vec<SignalId> {
        self.inner.registry.wanted()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Registers an observer after every existing one.
    pub fn add_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        self.inner.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    /// Receiver of every event, published after the observers ran.
    pub fn subscribe_events(&self) -> Receiver<ClientEvent> {
        self.inner.bus.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("client_name", &self.inner.config.client_name)
            .field("state", &self.state())
            .field("observers", &self.inner.observers.len())
            .field("subscriptions", &self.inner.registry.active().len())
            .finish()
    }
}

// ============================================================================
// Internals
// ============================================================================

impl Inner {
    fn async_connection(&self) -> Option<Arc<Connection>> {
        self.async_conn.read().clone()
    }

    fn sync_connection(&self) -> Option<Arc<Connection>> {
        self.sync_conn.read().clone()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            debug!(from = %previous, to = %next, "State changed");
            self.emit(ClientEvent::StateChanged { state: next });
        }
    }

    /// Moves `from -> to` unless the state changed meanwhile.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        {
            let mut state = self.state.write();
            if *state != from {
                return false;
            }
            *state = to;
        }
        debug!(from = %from, to = %to, "State changed");
        self.emit(ClientEvent::StateChanged { state: to });
        true
    }

    fn establish(self: &Arc<Self>) -> Result<DaemonAddress> {
        let config = &self.config;
        let address = config.resolve_address()?;
        let codec = FrameCodec::new(config.max_frame_size);
        let connector = config.connector.as_ref();

        // The async connection is opened first
        let async_conn = Arc::new(Connection::open(ASYNC_LABEL, connector, &address, codec)?);
        let sync_conn = Arc::new(Connection::open(SYNC_LABEL, connector, &address, codec)?);

        let hello = [
            Value::UInt(PROTOCOL_VERSION),
            Value::String(config.client_name.clone()),
        ];
        async_conn.send(RequestKind::Hello, &hello)?;
        let greeting = sync_conn.send(RequestKind::Hello, &hello)?;
        sync_conn.wait_for(&greeting, config.sync_timeout, config.poll_interval)?;

        *self.async_conn.write() = Some(Arc::clone(&async_conn));
        *self.sync_conn.write() = Some(sync_conn);

        let sink: Arc<dyn SubscriptionSink> = Arc::new(EmissionSink(Arc::downgrade(self)));
        let weak = Arc::downgrade(self);
        let event_loop = EventLoop::spawn(
            Arc::clone(&async_conn),
            sink,
            config.poll_interval,
            Box::new(move |err: ClientError| {
                if let Some(inner) = weak.upgrade() {
                    inner.connection_lost(err);
                }
            }),
        )?;
        *self.event_loop.lock() = Some(event_loop);

        let restored = self.registry.resubscribe(&async_conn)?;
        debug!(restored, "Subscriptions restored");
        Ok(address)
    }

    fn stop_loop(&self) {
        let event_loop = self.event_loop.lock().take();
        if let Some(event_loop) = event_loop {
            event_loop.stop();
        }
    }

    /// Closes whatever is open without touching the state.
    fn teardown(&self) -> usize {
        self.stop_loop();
        let async_conn = self.async_conn.write().take();
        let sync_conn = self.sync_conn.write().take();
        self.registry.reset();

        [async_conn, sync_conn]
            .into_iter()
            .flatten()
            .map(|conn| conn.close())
            .sum()
    }

    fn shutdown(&self) {
        let cancelled = self.teardown();
        if *self.state.read() != ConnectionState::Disconnected {
            info!(cancelled, "Disconnected from daemon");
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Runs once per lost connection.
    ///
    /// A loss noticed by a blocking caller is handed to the event loop, so
    /// cancellations and the loss events still reach observers on the loop
    /// thread. Only when no loop is running is it handled in place.
    fn connection_lost(&self, err: ClientError) {
        if let Some(event_loop) = self.event_loop.lock().as_ref() {
            if !event_loop.is_loop_thread() && event_loop.report_loss(err.clone()) {
                debug!(error = %err, "Connection loss handed to the event loop");
                return;
            }
        }

        {
            let mut state = self.state.write();
            if *state == ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        error!(error = %err, "Connection to daemon lost");

        // The event loop exits on its own once its connection is closed
        let async_conn = self.async_conn.write().take();
        let sync_conn = self.sync_conn.write().take();
        for conn in [sync_conn, async_conn].into_iter().flatten() {
            conn.close();
        }
        self.registry.reset();

        self.emit(ClientEvent::ConnectionLost {
            message: err.to_string(),
        });
        self.emit(ClientEvent::StateChanged {
            state: ConnectionState::Disconnected,
        });
    }

    fn issue(self: &Arc<Self>, kind: RequestKind, args: &[Value]) -> Result<RequestId> {
        let conn = self.async_connection().ok_or(ClientError::NotConnected)?;
        let weak = Arc::downgrade(self);
        let pending = conn.send_with_callback(
            kind,
            args,
            Box::new(move |id, kind, outcome| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_reply(id, kind, outcome);
                }
            }),
        )?;
        trace!(request_id = %pending.id(), ?kind, "Request issued");
        Ok(pending.id())
    }

    fn on_reply(self: &Arc<Self>, id: RequestId, kind: RequestKind, outcome: &Outcome) {
        let routed = routing::reply_event(id, kind, outcome, &self.config.source_preference);
        self.dispatch(routed);
    }

    fn on_emission(self: &Arc<Self>, signal: SignalId, outcome: &Outcome) {
        if let Some(conn) = self.async_connection() {
            if let Err(e) = self.registry.rearm(&conn, signal) {
                warn!(%signal, error = %e, "Failed to re-arm signal");
            }
        }
        let routed = routing::emission_event(signal, outcome, &self.config.source_preference);
        self.dispatch(routed);
    }

    fn dispatch(self: &Arc<Self>, routed: Routed) {
        if let Some(event) = routed.event {
            self.emit(event);
        }
        if let Some(follow_up) = routed.follow_up {
            if let Err(e) = self.issue(follow_up.request(), &[]) {
                debug!(?follow_up, error = %e, "Follow-up request not sent");
            }
        }
    }

    /// Hands `event` to the observers, then to bus subscribers.
    fn emit(&self, event: ClientEvent) {
        trace!(event = event.description(), "Emitting event");
        self.observers.notify(&event);
        if self.bus.emit(event).is_err() {
            trace!("No event bus subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDaemon, ASYNC_LINK, SYNC_LINK};
    use bridge_traits::error::BridgeError;
    use bridge_traits::transport::{Transport, TransportConnector};
    use core_runtime::events::ErrorKind;
    use mockall::mock;
    use std::thread;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    mock! {
        RefusingConnector {}

        impl TransportConnector for RefusingConnector {
            fn connect(&self, address: &DaemonAddress) -> bridge_traits::error::Result<Box<dyn Transport>>;
            fn default_address(&self) -> Option<DaemonAddress>;
        }
    }

    fn config(connector: Arc<dyn TransportConnector>) -> ClientConfig {
        ClientConfig::builder()
            .client_name("dispatcher-test")
            .address(DaemonAddress::unix("/tmp/xmms-ipc-test"))
            .sync_timeout(WAIT)
            .connector(connector)
            .build()
            .unwrap()
    }

    fn record(dispatcher: &Dispatcher) -> Arc<Mutex<Vec<ClientEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        dispatcher.add_observer(Arc::new(move |event: &ClientEvent| -> anyhow::Result<()> {
            sink.lock().push(event.clone());
            Ok(())
        }));
        events
    }

    fn wait_until(events: &Mutex<Vec<ClientEvent>>, pred: impl Fn(&ClientEvent) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if events.lock().iter().any(&pred) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_connect_failure_returns_to_disconnected() {
        let mut connector = MockRefusingConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Err(BridgeError::ConnectionFailed("refused".to_string())));

        let dispatcher = Dispatcher::new(config(Arc::new(connector))).unwrap();
        let events = record(&dispatcher);

        let err = dispatcher.connect().unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
        assert_eq!(dispatcher.state(), ConnectionState::Disconnected);

        let events = events.lock();
        assert_eq!(
            events[0],
            ClientEvent::StateChanged {
                state: ConnectionState::Connecting
            }
        );
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Error {
                origin: EventOrigin::Local,
                kind: ErrorKind::Connection,
                ..
            }
        )));
        assert_eq!(
            events.last(),
            Some(&ClientEvent::Error {
                origin: EventOrigin::Local,
                kind: ErrorKind::Connection,
                message: err.to_string(),
            })
        );
    }

    #[test]
    fn test_connect_greets_on_both_connections() {
        let daemon = MockDaemon::new();
        let dispatcher = Dispatcher::new(config(daemon.connector())).unwrap();
        let events = record(&dispatcher);

        dispatcher.connect().unwrap();
        assert!(dispatcher.is_connected());
        assert!(daemon
            .wait_for_request(ASYNC_LINK, RequestKind::Hello, WAIT)
            .is_some());
        assert!(daemon
            .wait_for_request(SYNC_LINK, RequestKind::Hello, WAIT)
            .is_some());

        let events = events.lock();
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Connected { client_name, .. } if client_name == "dispatcher-test"
        )));
    }

    #[test]
    fn test_issue_requires_connection() {
        let daemon = MockDaemon::new();
        let dispatcher = Dispatcher::new(config(daemon.connector())).unwrap();

        assert_eq!(
            dispatcher.issue(RequestKind::PlaybackStatus, &[]),
            Err(ClientError::NotConnected)
        );
        assert_eq!(
            dispatcher.issue_and_wait(RequestKind::PlaybackStatus, &[]),
            Err(ClientError::NotConnected)
        );
    }

    #[test]
    fn test_playlist_changed_without_list_requests_list() {
        let daemon = MockDaemon::new();
        let dispatcher = Dispatcher::new(config(daemon.connector())).unwrap();
        let events = record(&dispatcher);
        dispatcher.connect().unwrap();
        dispatcher.subscribe(SignalId::PlaylistChanged).unwrap();

        let sub = daemon
            .wait_for_request(
                ASYNC_LINK,
                RequestKind::Subscribe(SignalId::PlaylistChanged),
                WAIT,
            )
            .unwrap();
        daemon.reply(ASYNC_LINK, sub, &Value::UInt(0));

        let list = daemon
            .wait_for_request(ASYNC_LINK, RequestKind::PlaylistList, WAIT)
            .unwrap();
        daemon.reply(
            ASYNC_LINK,
            list,
            &Value::List(vec![Value::UInt(7), Value::UInt(8)]),
        );

        assert!(wait_until(&events, |e| matches!(
            e,
            ClientEvent::PlaylistChanged { ids, .. } if ids == &[7, 8]
        )));
        assert!(daemon
            .wait_for_request(ASYNC_LINK, RequestKind::PlaylistCurrentPos, WAIT)
            .is_some());
    }

    #[test]
    fn test_disconnect_cancels_and_shuts_links() {
        let daemon = MockDaemon::new();
        let dispatcher = Dispatcher::new(config(daemon.connector())).unwrap();
        let events = record(&dispatcher);
        dispatcher.connect().unwrap();

        let id = dispatcher.issue(RequestKind::PlaybackStatus, &[]).unwrap();
        daemon
            .wait_for_request(ASYNC_LINK, RequestKind::PlaybackStatus, WAIT)
            .unwrap();
        dispatcher.disconnect();

        assert_eq!(dispatcher.state(), ConnectionState::Disconnected);
        assert!(daemon.is_shut(ASYNC_LINK));
        assert!(daemon.is_shut(SYNC_LINK));

        let events = events.lock();
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Error { origin, kind: ErrorKind::Cancelled, .. }
                if origin.request_id() == Some(id)
        )));
        assert_eq!(
            events.last(),
            Some(&ClientEvent::StateChanged {
                state: ConnectionState::Disconnected
            })
        );
    }

    #[test]
    fn test_broadcasts_wanted_before_connect() {
        let daemon = MockDaemon::new();
        let dispatcher = Dispatcher::new(config(daemon.connector())).unwrap();

        dispatcher.enable_broadcasts().unwrap();
        assert!(dispatcher.broadcasts_enabled());
        assert_eq!(
            dispatcher.subscriptions().len(),
            SignalId::DEFAULT_SUBSCRIPTIONS.len()
        );

        dispatcher.connect().unwrap();
        assert!(daemon
            .wait_for_request(
                ASYNC_LINK,
                RequestKind::Subscribe(SignalId::PlaybackStatus),
                WAIT
            )
            .is_some());

        dispatcher.disable_broadcasts();
        assert!(dispatcher.subscriptions().is_empty());
        assert!(dispatcher.registry().active().is_empty());
    }
}
