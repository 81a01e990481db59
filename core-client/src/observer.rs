//! # Observers
//!
//! Statically typed event listeners with fault-isolated fan-out.
//!
//! ## Overview
//!
//! Every [`ClientEvent`] is handed to each registered [`Observer`] in
//! registration order. An observer that returns an error, or panics, is
//! logged and skipped; the remaining observers still receive the event.
//!
//! Closures taking `&ClientEvent` and returning `anyhow::Result<()>` are
//! observers:
//!
//! ```rust
//! use core_client::observer::ObserverSet;
//! use core_runtime::events::{ClientEvent, ConnectionState};
//! use std::sync::Arc;
//!
//! let observers = ObserverSet::new();
//! observers.add(Arc::new(|event: &ClientEvent| -> anyhow::Result<()> {
//!     println!("{}", event.description());
//!     Ok(())
//! }));
//!
//! observers.notify(&ClientEvent::StateChanged {
//!     state: ConnectionState::Connected,
//! });
//! ```

use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use core_runtime::events::ClientEvent;

/// Receiver of client events.
///
/// Called on the event-loop thread for daemon-driven events and on the
/// caller's thread for lifecycle events raised by `connect`/`disconnect`.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &ClientEvent) -> anyhow::Result<()>;
}

impl<F> Observer for F
where
    F: Fn(&ClientEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &ClientEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Handle used to remove an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Ordered set of observers.
#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Vec<(ObserverId, Arc<dyn Observer>)>>,
    next_id: AtomicU64,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` after every existing one.
    pub fn add(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Delivers `event` to every observer in registration order.
    ///
    /// Returns the number of observers that failed. Observers may add or
    /// remove observers while being notified; the change applies to the
    /// next event.
    pub fn notify(&self, event: &ClientEvent) -> usize {
        let snapshot: Vec<(ObserverId, Arc<dyn Observer>)> = self.observers.read().clone();

        let mut failures = 0;
        for (id, observer) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        observer = ?id,
                        event = event.description(),
                        error = %e,
                        "Observer failed"
                    );
                }
                Err(payload) => {
                    failures += 1;
                    warn!(
                        observer = ?id,
                        event = event.description(),
                        panic = %panic_message(&*payload),
                        "Observer panicked"
                    );
                }
            }
        }
        failures
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.len())
            .finish()
    }
}
