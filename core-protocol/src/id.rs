//! Request identifiers.
//!
//! Every request carries a 32-bit cookie echoed by the daemon in its reply.
//! Ids are handed out in increasing order and wrap from `u32::MAX` back to
//! zero. After a wrap, ids still owned by a pending request are skipped so
//! that two live requests never share a cookie.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cookie correlating a request with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u32);

impl RequestId {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-connection id allocator.
#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    next: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts allocation at `next`.
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Returns the next id for which `in_use` is false.
    ///
    /// Returns `None` only when every one of the 2^32 ids is in use.
    pub fn allocate(&mut self, in_use: impl Fn(RequestId) -> bool) -> Option<RequestId> {
        let start = self.next;
        loop {
            let candidate = RequestId(self.next);
            self.next = self.next.wrapping_add(1);
            if !in_use(candidate) {
                return Some(candidate);
            }
            if self.next == start {
                return None;
            }
        }
    }

    /// Id the next call to [`allocate`](Self::allocate) will try first.
    pub fn peek(&self) -> RequestId {
        RequestId(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_increase() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.allocate(|_| false), Some(RequestId(0)));
        assert_eq!(ids.allocate(|_| false), Some(RequestId(1)));
        assert_eq!(ids.peek(), RequestId(2));
    }

    #[test]
    fn test_wraps_to_zero() {
        let mut ids = IdAllocator::starting_at(u32::MAX);
        assert_eq!(ids.allocate(|_| false), Some(RequestId(u32::MAX)));
        assert_eq!(ids.allocate(|_| false), Some(RequestId(0)));
    }

    #[test]
    fn test_skips_pending_ids_after_wrap() {
        let pending: HashSet<RequestId> = [RequestId(0), RequestId(1)].into_iter().collect();
        let mut ids = IdAllocator::starting_at(u32::MAX);
        assert_eq!(
            ids.allocate(|id| pending.contains(&id)),
            Some(RequestId(u32::MAX))
        );
        assert_eq!(ids.allocate(|id| pending.contains(&id)), Some(RequestId(2)));
    }

    #[test]
    fn test_display() {
        assert_eq!(RequestId(12).to_string(), "#12");
    }
}
