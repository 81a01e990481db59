//! # Pending Results
//!
//! Handle to the outcome of one request.
//!
//! ## Overview
//!
//! A [`PendingResult`] is created when a request is queued and is completed
//! exactly once: with the decoded value, with the daemon's error, or with a
//! cancellation or connection error when the connection goes away first.
//! Later completion attempts are ignored.
//!
//! The outcome can be consumed in two ways:
//!
//! - **Blocking**: [`PendingResult::wait`] parks the calling thread on a
//!   condition variable until completion or timeout.
//! - **Callback**: a completion callback given at creation runs on the
//!   thread that completes the result (the event loop for async requests).
//!
//! Clones share the same state.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_protocol::{RequestId, RequestKind, Value};

use crate::error::ClientError;

/// Decoded value or the failure that replaced it.
pub type Outcome = std::result::Result<Value, ClientError>;

/// Runs once with the outcome of a request.
pub type CompletionCallback = Box<dyn FnOnce(RequestId, RequestKind, &Outcome) + Send>;

struct State {
    outcome: Option<Outcome>,
    callback: Option<CompletionCallback>,
}

struct Shared {
    state: Mutex<State>,
    done: Condvar,
}

/// Completion handle of one request.
#[derive(Clone)]
pub struct PendingResult {
    id: RequestId,
    kind: RequestKind,
    shared: Arc<Shared>,
}

impl PendingResult {
    pub fn new(id: RequestId, kind: RequestKind) -> Self {
        Self::build(id, kind, None)
    }

    /// Result whose completion also runs `callback`.
    pub fn with_callback(id: RequestId, kind: RequestKind, callback: CompletionCallback) -> Self {
        Self::build(id, kind, Some(callback))
    }

    fn build(id: RequestId, kind: RequestKind, callback: Option<CompletionCallback>) -> Self {
        Self {
            id,
            kind,
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    outcome: None,
                    callback,
                }),
                done: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Completes the result. Returns `false` if it was already complete.
    ///
    /// Waiters are woken before the callback runs; the callback runs on the
    /// calling thread without any lock held.
    pub fn complete(&self, outcome: Outcome) -> bool {
        let callback = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            self.shared.done.notify_all();
            state.callback.take()
        };

        if let Some(callback) = callback {
            callback(self.id, self.kind, &outcome);
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// Outcome if already complete.
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.shared.state.lock().outcome.clone()
    }

    /// Blocks until completion, or until `timeout` elapses.
    ///
    /// Returns `None` on timeout; `timeout = None` waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Outcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.done.wait_until(&mut state, deadline).timed_out() {
                        return state.outcome.clone();
                    }
                }
                None => self.shared.done.wait(&mut state),
            }
        }
    }
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_completes_once() {
        let result = PendingResult::new(RequestId(1), RequestKind::PlaybackStatus);
        assert!(!result.is_complete());

        assert!(result.complete(Ok(Value::UInt(1))));
        assert!(!result.complete(Err(ClientError::Cancelled)));

        assert_eq!(result.try_outcome(), Some(Ok(Value::UInt(1))));
    }

    #[test]
    fn test_callback_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let result = PendingResult::with_callback(
            RequestId(7),
            RequestKind::ConfigList,
            Box::new(move |id, kind, outcome| {
                assert_eq!(id, RequestId(7));
                assert_eq!(kind, RequestKind::ConfigList);
                assert!(outcome.is_err());
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        result.complete(Err(ClientError::Cancelled));
        result.complete(Ok(Value::None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_times_out() {
        let result = PendingResult::new(RequestId(2), RequestKind::PlaybackStatus);
        assert_eq!(result.wait(Some(Duration::from_millis(10))), None);
    }

    #[test]
    fn test_wait_wakes_on_completion() {
        let result = PendingResult::new(RequestId(3), RequestKind::PlaybackCurrentId);
        let completer = result.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete(Ok(Value::UInt(42)));
        });

        assert_eq!(result.wait(None), Some(Ok(Value::UInt(42))));
        handle.join().unwrap();
    }
}
