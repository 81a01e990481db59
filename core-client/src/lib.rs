//! # Core Client
//!
//! Asynchronous request/response engine for the music daemon.
//!
//! ## Overview
//!
//! - [`result`] - pending results that complete exactly once
//! - [`connection`] - one transport with request ids, pending routes,
//!   non-blocking sends and frame routing
//! - [`subscription`] - broadcast and signal subscriptions, including signal
//!   re-arming
//! - [`event_loop`] - the thread driving the async connection
//! - [`observer`] - fault-isolated event fan-out
//! - [`routing`] - replies and emissions turned into typed events
//! - [`dispatcher`] - the client handle tying everything together
//!
//! With the `test-support` feature, [`testing`] provides an in-memory daemon
//! for tests of dependent crates.
//!
//! ## Usage
//!
//! ```ignore
//! use core_client::{ClientEvent, Dispatcher};
//! use core_protocol::RequestKind;
//! use core_runtime::config::ClientConfig;
//! use std::sync::Arc;
//!
//! let dispatcher = Dispatcher::new(ClientConfig::builder().client_name("demo").build()?)?;
//! dispatcher.add_observer(Arc::new(|event: &ClientEvent| -> anyhow::Result<()> {
//!     println!("{:?}", event);
//!     Ok(())
//! }));
//!
//! dispatcher.connect()?;
//! let id = dispatcher.issue(RequestKind::ConfigList, &[])?;
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event_loop;
pub mod observer;
pub mod result;
pub mod routing;
pub mod subscription;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use connection::{Connection, SubscriptionSink};
pub use dispatcher::Dispatcher;
pub use error::{ClientError, Result};
pub use event_loop::EventLoop;
pub use observer::{Observer, ObserverId, ObserverSet};
pub use result::{CompletionCallback, Outcome, PendingResult};
pub use routing::{FollowUp, Routed};
pub use subscription::{SubscriptionRegistry, SubscriptionState};

pub use core_runtime::events::{ClientEvent, ConnectionState, ErrorKind, EventOrigin};
