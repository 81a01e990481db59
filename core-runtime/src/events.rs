//! # Event Bus System
//!
//! Typed client events and a `tokio::sync::broadcast` bus for publishing them.
//!
//! ## Overview
//!
//! Everything the daemon tells the client (replies to issued requests,
//! broadcast emissions, one-shot signal emissions) and every lifecycle change
//! of the client itself is turned into a [`ClientEvent`]. Each event records
//! where it came from through an [`EventOrigin`].
//!
//! The dispatcher hands each event to its registered observers first, in
//! registration order, and then publishes it on an [`EventBus`] so async
//! consumers can subscribe without registering an observer.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   frame    ┌────────────┐  ClientEvent  ┌───────────┐
//! │ Connection ├───────────>│ Dispatcher ├──────────────>│ Observers │
//! └────────────┘            │            │               └───────────┘
//!                           │            │     emit      ┌───────────┐  subscribe  ┌────────────┐
//!                           │            ├──────────────>│ EventBus  ├────────────>│ Subscriber │
//!                           └────────────┘               └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_protocol::PlaybackStatus;
//! use core_runtime::events::{ClientEvent, EventBus, EventOrigin};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut events = bus.subscribe();
//!
//! bus.emit(ClientEvent::PlaybackStatusChanged {
//!     origin: EventOrigin::Local,
//!     status: PlaybackStatus::Playing,
//! })
//! .ok();
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.description(), "Playback status changed");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! The bus uses `tokio::sync::broadcast`, which can produce two types of errors:
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Playtime signals arrive several times per second while playing; size the
//! buffer accordingly or filter them out with [`EventStream::filter`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

use core_protocol::{Dict, PlaybackStatus, RequestId, RequestKind, SignalId, Title, Value};

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Event Types
// ============================================================================

/// Where an event came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum EventOrigin {
    /// Reply to a request issued by this client
    Reply {
        request_id: RequestId,
        request: RequestKind,
    },
    /// Emission of a broadcast subscription
    Broadcast { signal: SignalId },
    /// Emission of a one-shot signal subscription
    Signal { signal: SignalId },
    /// Raised by the client itself
    Local,
}

impl EventOrigin {
    /// Request id for reply-originated events.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            EventOrigin::Reply { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }

    /// Signal for broadcast- or signal-originated events.
    pub fn signal(&self) -> Option<SignalId> {
        match self {
            EventOrigin::Broadcast { signal } | EventOrigin::Signal { signal } => Some(*signal),
            _ => None,
        }
    }
}

/// Lifecycle of a client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        })
    }
}

/// Failure category carried by [`ClientEvent::Error`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transport failed or the connection is gone
    Connection,
    /// The daemon answered with an error
    Protocol,
    /// The reply could not be interpreted
    Decode,
    /// No reply arrived in time
    Timeout,
    /// The connection closed before a reply arrived
    Cancelled,
    /// The request never reached the daemon
    Rejected,
}

/// Event delivered to observers and bus subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    /// Client lifecycle changed.
    StateChanged { state: ConnectionState },
    /// Both connections are established and greeted.
    Connected { client_name: String, address: String },
    /// The connection to the daemon broke. No reconnect is attempted.
    ConnectionLost { message: String },

    /// Configuration values (full list, or the changed subset).
    ConfigValueChanged { origin: EventOrigin, values: Dict },
    PlaybackStatusChanged {
        origin: EventOrigin,
        status: PlaybackStatus,
    },
    /// Media-library id of the current entry.
    CurrentIdChanged { origin: EventOrigin, id: u32 },
    /// Playback position in milliseconds.
    PlaytimeChanged { origin: EventOrigin, ms: u32 },
    /// Per-channel volume levels.
    PlaybackVolumeChanged { origin: EventOrigin, volume: Dict },
    /// Media-library ids of the active playlist, in order.
    PlaylistChanged { origin: EventOrigin, ids: Vec<u32> },
    /// Index of the current entry in the active playlist.
    PlaylistPositionChanged { origin: EventOrigin, position: u32 },
    /// Metadata of one media-library entry.
    TitleChanged { origin: EventOrigin, title: Title },
    /// A media-library entry was added or updated.
    MedialibEntryChanged { origin: EventOrigin, id: u32 },
    /// Rows returned by a media-library query.
    MedialibSelect {
        origin: EventOrigin,
        rows: Vec<Dict>,
    },
    /// Names of stored playlists, or the name of a loaded one.
    PlaylistLoaded {
        origin: EventOrigin,
        names: Vec<String>,
    },
    /// Plugin short names mapped to descriptions.
    PluginList { origin: EventOrigin, plugins: Dict },
    MediareaderStatusChanged { origin: EventOrigin, status: u32 },
    /// Anything without a dedicated event.
    Misc { origin: EventOrigin, value: Value },

    /// A request, broadcast or signal failed.
    Error {
        origin: EventOrigin,
        kind: ErrorKind,
        message: String,
    },
}

impl ClientEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &'static str {
        match self {
            ClientEvent::StateChanged { .. } => "Connection state changed",
            ClientEvent::Connected { .. } => "Connected to daemon",
            ClientEvent::ConnectionLost { .. } => "Connection to daemon lost",
            ClientEvent::ConfigValueChanged { .. } => "Configuration values changed",
            ClientEvent::PlaybackStatusChanged { .. } => "Playback status changed",
            ClientEvent::CurrentIdChanged { .. } => "Current entry changed",
            ClientEvent::PlaytimeChanged { .. } => "Playtime updated",
            ClientEvent::PlaybackVolumeChanged { .. } => "Volume changed",
            ClientEvent::PlaylistChanged { .. } => "Playlist changed",
            ClientEvent::PlaylistPositionChanged { .. } => "Playlist position changed",
            ClientEvent::TitleChanged { .. } => "Entry metadata received",
            ClientEvent::MedialibEntryChanged { .. } => "Media library entry changed",
            ClientEvent::MedialibSelect { .. } => "Media library query answered",
            ClientEvent::PlaylistLoaded { .. } => "Playlists listed or loaded",
            ClientEvent::PluginList { .. } => "Plugin list received",
            ClientEvent::MediareaderStatusChanged { .. } => "Media reader status changed",
            ClientEvent::Misc { .. } => "Reply received",
            ClientEvent::Error { .. } => "Request failed",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            ClientEvent::ConnectionLost { .. } => EventSeverity::Error,
            ClientEvent::Error {
                kind: ErrorKind::Cancelled,
                ..
            } => EventSeverity::Warning,
            ClientEvent::Error { .. } => EventSeverity::Error,
            ClientEvent::StateChanged { .. } | ClientEvent::Connected { .. } => {
                EventSeverity::Info
            }
            _ => EventSeverity::Debug,
        }
    }

    /// Origin of daemon-driven events; `None` for lifecycle events.
    pub fn origin(&self) -> Option<&EventOrigin> {
        match self {
            ClientEvent::StateChanged { .. }
            | ClientEvent::Connected { .. }
            | ClientEvent::ConnectionLost { .. } => None,
            ClientEvent::ConfigValueChanged { origin, .. }
            | ClientEvent::PlaybackStatusChanged { origin, .. }
            | ClientEvent::CurrentIdChanged { origin, .. }
            | ClientEvent::PlaytimeChanged { origin, .. }
            | ClientEvent::PlaybackVolumeChanged { origin, .. }
            | ClientEvent::PlaylistChanged { origin, .. }
            | ClientEvent::PlaylistPositionChanged { origin, .. }
            | ClientEvent::TitleChanged { origin, .. }
            | ClientEvent::MedialibEntryChanged { origin, .. }
            | ClientEvent::MedialibSelect { origin, .. }
            | ClientEvent::PlaylistLoaded { origin, .. }
            | ClientEvent::PluginList { origin, .. }
            | ClientEvent::MediareaderStatusChanged { origin, .. }
            | ClientEvent::Misc { origin, .. }
            | ClientEvent::Error { origin, .. } => Some(origin),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ClientEvent::Error { .. })
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel for [`ClientEvent`]s.
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   Must be greater than zero.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: ClientEvent) -> Result<usize, SendError<ClientEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(8);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&ClientEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{ClientEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(16);
/// let errors_only = EventStream::new(event_bus.subscribe()).filter(ClientEvent::is_error);
/// ```
pub struct EventStream {
    receiver: Receiver<ClientEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<ClientEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ClientEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &ClientEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<ClientEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<ClientEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
