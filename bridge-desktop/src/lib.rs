//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides the socket transport used to reach a local or remote
//! daemon:
//! - `TransportConnector` via [`SocketConnector`] (Unix-domain sockets on
//!   Unix hosts, TCP everywhere)
//! - `Transport` via [`SocketTransport`], a blocking `std::net` /
//!   `std::os::unix::net` stream driven with short read and write timeouts
//!   so that it never blocks past the poll interval
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::SocketConnector;
//! use bridge_traits::TransportConnector;
//!
//! let connector = SocketConnector::new();
//! let address = connector.default_address().expect("desktop default");
//! let transport = connector.connect(&address)?;
//! ```

mod socket;

pub use socket::{SocketConnector, SocketTransport};
