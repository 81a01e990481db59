//! # Subscription Registry
//!
//! Tracks which broadcasts and signals the client wants and which of them
//! are live on the current connection.
//!
//! ## State machine
//!
//! ```text
//!                 subscribe (broadcast)
//! Unsubscribed ──────────────────────────> Subscribed(id)
//!      │          subscribe (signal)
//!      └─────────────────────────────────> Armed(id) ──┐
//!                                             ^        │ delivery: re-issue
//!                                             └────────┘
//! reset / unsubscribe: any state ──> Unsubscribed
//! ```
//!
//! A signal delivers one emission per subscribe request, so the registry
//! re-issues the identical subscribe request after every delivery. A
//! broadcast keeps delivering on its original id.
//!
//! The *wanted* set survives [`SubscriptionRegistry::reset`] so that a
//! reconnect can restore every subscription with
//! [`SubscriptionRegistry::resubscribe`].

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

use core_protocol::{RequestId, SignalId, SubscriptionMode};

use crate::connection::Connection;
use crate::error::Result;

/// Live state of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    /// Broadcast delivering on `RequestId`
    Subscribed(RequestId),
    /// Signal waiting for its next emission on `RequestId`
    Armed(RequestId),
}

impl SubscriptionState {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            SubscriptionState::Unsubscribed => None,
            SubscriptionState::Subscribed(id) | SubscriptionState::Armed(id) => Some(*id),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, SubscriptionState::Unsubscribed)
    }
}

#[derive(Debug, Default)]
struct Inner {
    wanted: BTreeSet<SignalId>,
    live: BTreeMap<SignalId, SubscriptionState>,
}

/// Per-client record of subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to `signal` on `conn` unless already live.
    ///
    /// Returns the id emissions will carry.
    pub fn subscribe(&self, conn: &Connection, signal: SignalId) -> Result<RequestId> {
        let mut inner = self.inner.lock();
        inner.wanted.insert(signal);
        if let Some(id) = inner.live.get(&signal).and_then(SubscriptionState::request_id) {
            return Ok(id);
        }

        let id = conn.send_subscription(signal)?;
        inner.live.insert(signal, live_state(signal, id));
        debug!(%signal, request_id = %id, "Subscribed");
        Ok(id)
    }

    /// Records `signal` as wanted without subscribing. It goes live on the
    /// next [`resubscribe`](Self::resubscribe).
    pub fn want(&self, signal: SignalId) -> bool {
        self.inner.lock().wanted.insert(signal)
    }

    /// Stops delivering `signal`. The daemon is not told; its emissions are
    /// dropped as unknown frames.
    ///
    /// Returns whether the signal was wanted or live.
    pub fn unsubscribe(&self, conn: Option<&Connection>, signal: SignalId) -> bool {
        let mut inner = self.inner.lock();
        let wanted = inner.wanted.remove(&signal);
        let live = inner.live.remove(&signal).and_then(|s| s.request_id());
        if let (Some(conn), Some(id)) = (conn, live) {
            conn.forget(id);
            debug!(%signal, request_id = %id, "Unsubscribed");
        }
        wanted || live.is_some()
    }

    /// Re-issues a signal subscription after it delivered.
    ///
    /// Broadcasts and signals no longer wanted are left alone. Returns the
    /// new id when a subscribe request was sent.
    pub fn rearm(&self, conn: &Connection, signal: SignalId) -> Result<Option<RequestId>> {
        if signal.mode() != SubscriptionMode::Signal {
            return Ok(None);
        }

        let mut inner = self.inner.lock();
        if !inner.wanted.contains(&signal) {
            inner.live.remove(&signal);
            return Ok(None);
        }

        match conn.send_subscription(signal) {
            Ok(id) => {
                inner.live.insert(signal, SubscriptionState::Armed(id));
                trace!(%signal, request_id = %id, "Signal re-armed");
                Ok(Some(id))
            }
            Err(e) => {
                inner.live.remove(&signal);
                Err(e)
            }
        }
    }

    /// Subscribes every wanted signal on a fresh connection.
    pub fn resubscribe(&self, conn: &Connection) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.live.clear();

        let wanted: Vec<SignalId> = inner.wanted.iter().copied().collect();
        for signal in &wanted {
            let id = conn.send_subscription(*signal)?;
            inner.live.insert(*signal, live_state(*signal, id));
        }
        debug!(count = wanted.len(), "Subscriptions re-established");
        Ok(wanted.len())
    }

    /// Marks every subscription unsubscribed; the wanted set is kept.
    pub fn reset(&self) {
        self.inner.lock().live.clear();
    }

    /// Forgets every subscription, wanted or live.
    pub fn clear(&self, conn: Option<&Connection>) {
        let mut inner = self.inner.lock();
        if let Some(conn) = conn {
            for id in inner.live.values().filter_map(SubscriptionState::request_id) {
                conn.forget(id);
            }
        }
        inner.live.clear();
        inner.wanted.clear();
    }

    pub fn state(&self, signal: SignalId) -> SubscriptionState {
        self.inner
            .lock()
            .live
            .get(&signal)
            .copied()
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    /// Signals currently live.
    pub fn active(&self) -> Vec<SignalId> {
        self.inner.lock().live.keys().copied().collect()
    }

    /// Signals restored on reconnect.
    pub fn wanted(&self) -> Vec<SignalId> {
        self.inner.lock().wanted.iter().copied().collect()
    }

    pub fn is_wanted(&self, signal: SignalId) -> bool {
        self.inner.lock().wanted.contains(&signal)
    }
}

fn live_state(signal: SignalId, id: RequestId) -> SubscriptionState {
    match signal.mode() {
        SubscriptionMode::Broadcast => SubscriptionState::Subscribed(id),
        SubscriptionMode::Signal => SubscriptionState::Armed(id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDaemon;
    use bridge_traits::transport::DaemonAddress;
    use core_protocol::{FrameCodec, RequestKind};
    use std::time::Duration;

    fn connect(daemon: &MockDaemon) -> Connection {
        Connection::open(
            "test",
            &*daemon.connector(),
            &DaemonAddress::unix("/tmp/mock"),
            FrameCodec::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);
        let registry = SubscriptionRegistry::new();

        let a = registry.subscribe(&conn, SignalId::PlaybackStatus).unwrap();
        let b = registry.subscribe(&conn, SignalId::PlaybackStatus).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            registry.state(SignalId::PlaybackStatus),
            SubscriptionState::Subscribed(a)
        );
        assert_eq!(conn.pending_count(), 1);
    }

    #[test]
    fn test_signal_is_armed_and_rearmed() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);
        let registry = SubscriptionRegistry::new();

        let first = registry.subscribe(&conn, SignalId::PlaybackPlaytime).unwrap();
        assert_eq!(
            registry.state(SignalId::PlaybackPlaytime),
            SubscriptionState::Armed(first)
        );

        let second = registry
            .rearm(&conn, SignalId::PlaybackPlaytime)
            .unwrap()
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(
            registry.state(SignalId::PlaybackPlaytime),
            SubscriptionState::Armed(second)
        );

        let ids = daemon.wait_for_requests(
            0,
            RequestKind::Subscribe(SignalId::PlaybackPlaytime),
            2,
            Duration::from_secs(1),
        );
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_broadcast_is_not_rearmed() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);
        let registry = SubscriptionRegistry::new();

        registry.subscribe(&conn, SignalId::PlaylistChanged).unwrap();
        assert_eq!(registry.rearm(&conn, SignalId::PlaylistChanged).unwrap(), None);
        assert_eq!(conn.pending_count(), 1);
    }

    #[test]
    fn test_unsubscribed_signal_is_not_rearmed() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);
        let registry = SubscriptionRegistry::new();

        registry.subscribe(&conn, SignalId::PlaybackPlaytime).unwrap();
        assert!(registry.unsubscribe(Some(&conn), SignalId::PlaybackPlaytime));
        assert_eq!(registry.rearm(&conn, SignalId::PlaybackPlaytime).unwrap(), None);
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn test_reset_keeps_wanted_for_resubscribe() {
        let daemon = MockDaemon::new();
        let registry = SubscriptionRegistry::new();

        let first = connect(&daemon);
        registry.subscribe(&first, SignalId::PlaybackStatus).unwrap();
        registry.subscribe(&first, SignalId::PlaybackPlaytime).unwrap();
        first.close();
        registry.reset();

        assert!(registry.active().is_empty());
        assert_eq!(registry.wanted().len(), 2);

        let second = connect(&daemon);
        assert_eq!(registry.resubscribe(&second).unwrap(), 2);
        assert!(registry.state(SignalId::PlaybackStatus).is_active());
        assert!(registry.state(SignalId::PlaybackPlaytime).is_active());
        assert_eq!(second.pending_count(), 2);
    }

    #[test]
    fn test_wanted_before_connect() {
        let daemon = MockDaemon::new();
        let registry = SubscriptionRegistry::new();

        assert!(registry.want(SignalId::PlaylistChanged));
        assert!(!registry.want(SignalId::PlaylistChanged));
        assert!(registry.active().is_empty());

        let conn = connect(&daemon);
        assert_eq!(registry.resubscribe(&conn).unwrap(), 1);
        assert!(registry.state(SignalId::PlaylistChanged).is_active());

        assert!(registry.unsubscribe(None, SignalId::PlaylistChanged));
        assert!(!registry.is_wanted(SignalId::PlaylistChanged));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let daemon = MockDaemon::new();
        let conn = connect(&daemon);
        let registry = SubscriptionRegistry::new();

        registry.subscribe(&conn, SignalId::PlaybackStatus).unwrap();
        registry.clear(Some(&conn));

        assert!(registry.wanted().is_empty());
        assert_eq!(conn.pending_count(), 0);
    }
}
