//! # Core Protocol
//!
//! Wire-level building blocks for talking to the music daemon.
//!
//! ## Overview
//!
//! This crate knows nothing about sockets or threads. It provides:
//!
//! - [`codec`] - frame layout, request encoding and incremental frame splitting
//! - [`decoder`] - reply interpretation, including the single-slot streaming
//!   dictionary decode
//! - [`command`] - request kinds, wire ids and subscribable signals
//! - [`value`] - decoded value shapes (`Value`, `Dict`, `PropDict`)
//! - [`source`] - source preference ranking for property dictionaries
//! - [`title`] - track metadata built from media-library entries
//! - [`id`] - request ids and their wrap-around allocation
//!
//! ## Usage
//!
//! ```rust
//! use bytes::BytesMut;
//! use core_protocol::{FrameCodec, RequestId, RequestKind, Value};
//!
//! let codec = FrameCodec::default();
//! let mut out = BytesMut::new();
//! codec
//!     .encode_request(RequestKind::ConfigGet, RequestId(0), &[Value::from("output.plugin")], &mut out)
//!     .unwrap();
//!
//! let frame = codec.decode(&mut out).unwrap().unwrap();
//! assert_eq!(frame.cookie, 0);
//! ```

pub mod codec;
pub mod command;
pub mod decoder;
pub mod error;
pub mod id;
pub mod source;
pub mod title;
pub mod value;

pub use codec::{Frame, FrameCodec, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN};
pub use command::{
    Object, PlaybackStatus, RequestKind, SignalId, SubscriptionMode, PROTOCOL_VERSION,
};
pub use decoder::{DecodeSlot, Reply, ResultDecoder, StreamGuard, MAX_NESTING};
pub use error::{CodecError, DecodeError};
pub use id::{IdAllocator, RequestId};
pub use source::{SourcePreference, DEFAULT_SOURCE_PREFERENCE};
pub use title::Title;
pub use value::{Dict, PropDict, PropEntry, Value};
