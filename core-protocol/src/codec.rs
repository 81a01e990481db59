//! # Frame Codec
//!
//! Length-prefixed framing for the daemon's IPC stream.
//!
//! ## Frame layout
//!
//! Every message starts with a 16-byte header of big-endian `u32` fields:
//!
//! | Offset | Field     |
//! |--------|-----------|
//! | 0      | object    |
//! | 4      | command   |
//! | 8      | cookie    |
//! | 12     | length    |
//!
//! followed by `length` payload bytes.
//!
//! Request arguments are written untagged, in call order. Reply payloads
//! carry a single tagged value (see [`WireType`](crate::decoder::WireType)).
//! An `ERROR` reply carries the daemon's message as a string.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::{Command, RequestKind};
use crate::decoder::WireType;
use crate::error::CodecError;
use crate::id::RequestId;
use crate::value::Value;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 16;

/// Largest payload accepted by default.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub object: u32,
    pub command: u32,
    pub cookie: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(object: u32, command: u32, cookie: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            object,
            command,
            cookie,
            payload: payload.into(),
        }
    }

    /// Successful reply carrying `value`.
    pub fn reply(cookie: RequestId, value: &Value) -> Result<Self, CodecError> {
        let mut payload = BytesMut::new();
        encode_value(value, &mut payload)?;
        Ok(Self::new(0, Command::Reply as u32, cookie.0, payload.freeze()))
    }

    /// Error reply carrying the daemon's message.
    pub fn error(cookie: RequestId, message: &str) -> Self {
        let mut payload = BytesMut::new();
        put_string(message, &mut payload);
        Self::new(0, Command::Error as u32, cookie.0, payload.freeze())
    }

    pub fn request_id(&self) -> RequestId {
        RequestId(self.cookie)
    }

    pub fn is_error(&self) -> bool {
        self.command == Command::Error as u32
    }

    /// Header plus payload as one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        put_header(
            self.object,
            self.command,
            self.cookie,
            self.payload.len(),
            &mut buf,
        );
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Encoder and incremental decoder for frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Appends a request frame for `kind` with `args` to `dst`.
    pub fn encode_request(
        &self,
        kind: RequestKind,
        cookie: RequestId,
        args: &[Value],
        dst: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let mut payload = BytesMut::new();
        for arg in args {
            encode_arg(arg, &mut payload)?;
        }
        let (object, command) = kind.wire();
        self.encode_frame(&Frame::new(object, command, cookie.0, payload.freeze()), dst)
    }

    /// Appends an already-built frame to `dst`.
    pub fn encode_frame(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        self.check_length(frame.payload.len())?;
        dst.reserve(HEADER_LEN + frame.payload.len());
        put_header(
            frame.object,
            frame.command,
            frame.cookie,
            frame.payload.len(),
            dst,
        );
        dst.put_slice(&frame.payload);
        Ok(())
    }

    /// Splits one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` while the frame is incomplete. A header announcing
    /// a payload above the limit is an error; the stream cannot be resynced.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let object = header.get_u32();
        let command = header.get_u32();
        let cookie = header.get_u32();
        let length = header.get_u32() as usize;

        self.check_length(length)?;

        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();
        Ok(Some(Frame {
            object,
            command,
            cookie,
            payload,
        }))
    }

    fn check_length(&self, length: usize) -> Result<(), CodecError> {
        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                length,
                limit: self.max_frame_size,
            });
        }
        Ok(())
    }
}

fn put_header(object: u32, command: u32, cookie: u32, length: usize, dst: &mut BytesMut) {
    dst.put_u32(object);
    dst.put_u32(command);
    dst.put_u32(cookie);
    dst.put_u32(length as u32);
}

// ============================================================================
// Payload writers
// ============================================================================

/// Writes a string as `u32` length (including the NUL), bytes, NUL.
pub fn put_string(s: &str, dst: &mut BytesMut) {
    dst.put_u32(s.len() as u32 + 1);
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

fn put_binary(b: &[u8], dst: &mut BytesMut) {
    dst.put_u32(b.len() as u32);
    dst.put_slice(b);
}

/// Writes one untagged request argument.
pub fn encode_arg(arg: &Value, dst: &mut BytesMut) -> Result<(), CodecError> {
    match arg {
        Value::UInt(v) => dst.put_u32(*v),
        Value::Int(v) => dst.put_i32(*v),
        Value::String(s) => put_string(s, dst),
        Value::Binary(b) => put_binary(b, dst),
        Value::List(items) => {
            dst.put_u32(items.len() as u32);
            for item in items {
                match item {
                    Value::String(s) => put_string(s, dst),
                    _ => return Err(CodecError::UnsupportedArgument("non-string list element")),
                }
            }
        }
        Value::None => return Err(CodecError::UnsupportedArgument("none")),
        Value::Dict(_) => return Err(CodecError::UnsupportedArgument("dict")),
        Value::PropDict(_) => return Err(CodecError::UnsupportedArgument("propdict")),
    }
    Ok(())
}

/// Writes one tagged reply value.
pub fn encode_value(value: &Value, dst: &mut BytesMut) -> Result<(), CodecError> {
    match value {
        Value::None => dst.put_u32(WireType::None as u32),
        Value::UInt(v) => {
            dst.put_u32(WireType::UInt32 as u32);
            dst.put_u32(*v);
        }
        Value::Int(v) => {
            dst.put_u32(WireType::Int32 as u32);
            dst.put_i32(*v);
        }
        Value::String(s) => {
            dst.put_u32(WireType::String as u32);
            put_string(s, dst);
        }
        Value::Binary(b) => {
            dst.put_u32(WireType::Bin as u32);
            put_binary(b, dst);
        }
        Value::List(items) => {
            dst.put_u32(WireType::List as u32);
            dst.put_u32(items.len() as u32);
            for item in items {
                encode_value(item, dst)?;
            }
        }
        Value::Dict(dict) => {
            dst.put_u32(WireType::Dict as u32);
            dst.put_u32(dict.len() as u32);
            for (key, value) in dict.iter() {
                put_string(key, dst);
                dst.put_u32(WireType::String as u32);
                put_string(value, dst);
            }
        }
        Value::PropDict(props) => {
            let total: usize = props.keys().map(|k| props.entries(k).len()).sum();
            dst.put_u32(WireType::PropDict as u32);
            dst.put_u32(total as u32);
            for key in props.keys() {
                for entry in props.entries(key) {
                    put_string(&entry.source, dst);
                    put_string(key, dst);
                    dst.put_u32(WireType::String as u32);
                    put_string(&entry.value, dst);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode_request(
                RequestKind::ConfigGet,
                RequestId(7),
                &[Value::from("output.plugin")],
                &mut buf,
            )
            .unwrap();

        assert_eq!(&buf[0..4], &2u32.to_be_bytes());
        assert_eq!(&buf[4..8], &(Command::GetValue as u32).to_be_bytes());
        assert_eq!(&buf[8..12], &7u32.to_be_bytes());
        let len = "output.plugin".len() + 1 + 4;
        assert_eq!(&buf[12..16], &(len as u32).to_be_bytes());
        assert_eq!(buf.len(), HEADER_LEN + len);
        assert_eq!(buf[buf.len() - 1], 0);
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let codec = FrameCodec::default();
        let frame = Frame::reply(RequestId(3), &Value::UInt(5)).unwrap();
        let bytes = frame.to_bytes();

        let mut buf = BytesMut::from(&bytes[..10]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&bytes[10..bytes.len() - 1]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&bytes[bytes.len() - 1..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_splits_back_to_back_frames() {
        let codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Frame::reply(RequestId(1), &Value::None).unwrap().to_bytes());
        buf.extend_from_slice(&Frame::error(RequestId(2), "nope").to_bytes());

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.cookie, 1);
        assert!(second.is_error());
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let codec = FrameCodec::new(8);
        let frame = Frame::new(0, 2, 1, vec![0u8; 9]);

        let mut buf = BytesMut::from(&frame.to_bytes()[..]);
        assert_eq!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge {
                length: 9,
                limit: 8
            })
        );

        let mut out = BytesMut::new();
        assert!(codec.encode_frame(&frame, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_dict_is_not_an_argument() {
        let mut buf = BytesMut::new();
        assert_eq!(
            encode_arg(&Value::Dict(Default::default()), &mut buf),
            Err(CodecError::UnsupportedArgument("dict"))
        );
    }

    #[test]
    fn test_string_list_argument() {
        let mut buf = BytesMut::new();
        encode_arg(
            &Value::List(vec![Value::from("artist"), Value::from("title")]),
            &mut buf,
        )
        .unwrap();
        assert_eq!(&buf[0..4], &2u32.to_be_bytes());
        assert_eq!(buf.len(), 4 + (4 + 7) + (4 + 6));
    }
}
