//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the client engine and
//! platform-specific implementations. The engine needs two capabilities from
//! its host: a way to open a byte stream to the daemon, and optionally a sink
//! for structured logs.
//!
//! ## Traits
//!
//! ### Transport
//! - [`TransportConnector`](transport::TransportConnector) - Opens transports for a [`DaemonAddress`](transport::DaemonAddress)
//! - [`Transport`](transport::Transport) - Bounded-wait, non-blocking byte stream to the daemon
//!
//! ### Utilities
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop (Unix socket, TCP) | `bridge-desktop` | ✅ Available |
//! | In-memory (tests) | `core-client` `test-support` feature | ✅ Available |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Report a closed peer as [`Readiness::Closed`](transport::Readiness) or `Ok(0)` from `read`
//! - Never block past the timeout given to `wait_readable`
//!
//! ## Thread Safety
//!
//! Connectors are shared across threads (`Send + Sync`). A transport is owned
//! by exactly one connection and only needs to be `Send`.
//!
//! ## Examples
//!
//! ### Implementing TransportConnector
//!
//! ```ignore
//! use bridge_traits::transport::{DaemonAddress, Transport, TransportConnector};
//! use bridge_traits::error::Result;
//!
//! pub struct MyConnector;
//!
//! impl TransportConnector for MyConnector {
//!     fn connect(&self, address: &DaemonAddress) -> Result<Box<dyn Transport>> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod logging;
pub mod transport;

pub use error::BridgeError;

// Re-export commonly used types
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
pub use transport::{DaemonAddress, Readiness, Transport, TransportConnector, DEFAULT_TCP_PORT};
