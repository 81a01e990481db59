//! # Core Runtime Module
//!
//! Provides the ambient runtime infrastructure of the daemon client:
//! - Logging and tracing initialisation
//! - Client configuration with validated builders
//! - Typed client events and the event bus
//!
//! ## Overview
//!
//! This crate contains the utilities the engine crates depend on. It
//! establishes the configuration, logging conventions and event
//! broadcasting used throughout the workspace, and knows nothing about
//! sockets or request routing.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
