//! Workspace facade crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `xmms-client-workspace`
//! and enable `desktop-shims` to get the socket transport wired in without
//! depending on each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
