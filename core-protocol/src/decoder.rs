//! # Result Decoding
//!
//! Turns a reply frame into a [`Reply`]: either a typed [`Value`] or the
//! daemon's error message.
//!
//! ## Streaming dictionaries
//!
//! Dictionary payloads are walked entry by entry and accumulated into a
//! scratch container owned by a [`DecodeSlot`]. The slot holds exactly one
//! scratch buffer, so only one streaming decode may be in flight per slot.
//! A second decode blocks on the slot's condition variable until the first
//! finishes; entries from two decodes are never interleaved.
//!
//! ## Usage
//!
//! ```rust
//! use core_protocol::codec::Frame;
//! use core_protocol::decoder::{Reply, ResultDecoder};
//! use core_protocol::id::RequestId;
//! use core_protocol::value::{Dict, Value};
//!
//! let dict: Dict = [("foo", "bar")].into_iter().collect();
//! let frame = Frame::reply(RequestId(1), &Value::Dict(dict.clone())).unwrap();
//!
//! let decoder = ResultDecoder::new();
//! assert_eq!(decoder.decode(&frame).unwrap(), Reply::Value(Value::Dict(dict)));
//! ```

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::trace;

use crate::codec::Frame;
use crate::command::Command;
use crate::error::{DecodeError, Result};
use crate::value::{Dict, PropDict, Value};

/// Deepest list nesting a reply may carry.
pub const MAX_NESTING: usize = 64;

/// Value tags used in reply payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WireType {
    None = 0,
    UInt32 = 1,
    Int32 = 2,
    String = 3,
    Dict = 4,
    List = 5,
    PropDict = 6,
    Bin = 7,
}

impl WireType {
    pub fn from_tag(tag: u32) -> Result<Self> {
        Ok(match tag {
            0 => WireType::None,
            1 => WireType::UInt32,
            2 => WireType::Int32,
            3 => WireType::String,
            4 => WireType::Dict,
            5 => WireType::List,
            6 => WireType::PropDict,
            7 => WireType::Bin,
            other => return Err(DecodeError::UnknownTag(other as i32)),
        })
    }

    fn name(self) -> &'static str {
        match self {
            WireType::None => "none",
            WireType::UInt32 => "uint32",
            WireType::Int32 => "int32",
            WireType::String => "string",
            WireType::Dict => "dict",
            WireType::List => "list",
            WireType::PropDict => "propdict",
            WireType::Bin => "binary",
        }
    }
}

// ============================================================================
// Payload reader
// ============================================================================

/// Cursor over a frame payload.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(DecodeError::Truncated(what));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4, "uint32")?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4, "int32")?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a NUL-terminated string prefixed by its length.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len, "string")?;
        let bytes = match bytes.split_last() {
            Some((0, rest)) => rest,
            _ => bytes,
        };
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_binary(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len, "binary")?.to_vec())
    }

    pub fn read_tag(&mut self) -> Result<WireType> {
        WireType::from_tag(self.read_u32()?)
    }

    /// Fails if unread bytes remain.
    pub fn finish(self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

// ============================================================================
// Decode slot
// ============================================================================

#[derive(Debug, Default)]
struct Scratch {
    dict: Dict,
    props: PropDict,
}

#[derive(Debug, Default)]
struct SlotState {
    in_use: bool,
    scratch: Option<Scratch>,
}

/// Single scratch buffer shared by streaming decodes.
#[derive(Debug)]
pub struct DecodeSlot {
    state: Mutex<SlotState>,
    available: Condvar,
}

impl Default for DecodeSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                in_use: false,
                scratch: Some(Scratch::default()),
            }),
            available: Condvar::new(),
        }
    }

    /// Claims the scratch buffer, waiting while another decode holds it.
    pub fn begin_stream(&self) -> StreamGuard<'_> {
        let mut state = self.state.lock();
        while state.in_use {
            self.available.wait(&mut state);
        }
        state.in_use = true;
        let scratch = state.scratch.take().unwrap_or_default();
        StreamGuard {
            slot: self,
            scratch: Some(scratch),
        }
    }

    /// Whether a streaming decode currently holds the buffer.
    pub fn is_busy(&self) -> bool {
        self.state.lock().in_use
    }

    fn release(&self, mut scratch: Scratch) {
        scratch.dict.clear();
        scratch.props.clear();
        let mut state = self.state.lock();
        state.scratch = Some(scratch);
        state.in_use = false;
        drop(state);
        self.available.notify_one();
    }
}

/// Exclusive access to the scratch buffer for one streaming decode.
///
/// Dropping the guard clears the buffer and wakes one waiting decode.
#[derive(Debug)]
pub struct StreamGuard<'a> {
    slot: &'a DecodeSlot,
    scratch: Option<Scratch>,
}

impl StreamGuard<'_> {
    fn scratch(&mut self) -> &mut Scratch {
        self.scratch.get_or_insert_with(Scratch::default)
    }

    /// Adds a flat dictionary entry. Empty keys are discarded.
    pub fn insert(&mut self, key: String, value: String) -> bool {
        self.scratch().dict.insert(key, value)
    }

    /// Appends a property entry. Empty keys are discarded.
    pub fn append(&mut self, key: String, value: String, source: String) -> bool {
        self.scratch().props.append(key, value, source)
    }

    /// Hands back the accumulated dictionary.
    pub fn finish_dict(mut self) -> Dict {
        std::mem::take(&mut self.scratch().dict)
    }

    /// Hands back the accumulated property dictionary.
    pub fn finish_propdict(mut self) -> PropDict {
        std::mem::take(&mut self.scratch().props)
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        let scratch = self.scratch.take().unwrap_or_default();
        self.slot.release(scratch);
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Outcome carried by a reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(Value),
    DaemonError(String),
}

/// Interprets reply payloads. Clones share one [`DecodeSlot`].
#[derive(Debug, Clone, Default)]
pub struct ResultDecoder {
    slot: Arc<DecodeSlot>,
}

impl ResultDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(slot: Arc<DecodeSlot>) -> Self {
        Self { slot }
    }

    pub fn slot(&self) -> &Arc<DecodeSlot> {
        &self.slot
    }

    /// Decodes a reply or error frame.
    pub fn decode(&self, frame: &Frame) -> Result<Reply> {
        if frame.command == Command::Error as u32 {
            let mut reader = PayloadReader::new(&frame.payload);
            let message = if reader.remaining() == 0 {
                String::new()
            } else {
                reader.read_string()?
            };
            return Ok(Reply::DaemonError(message));
        }
        self.decode_value(&frame.payload).map(Reply::Value)
    }

    /// Decodes a tagged value that must span the whole payload.
    ///
    /// An empty payload decodes to [`Value::None`].
    pub fn decode_value(&self, payload: &[u8]) -> Result<Value> {
        if payload.is_empty() {
            return Ok(Value::None);
        }
        let mut reader = PayloadReader::new(payload);
        let value = self.read_value(&mut reader, 0)?;
        reader.finish()?;
        Ok(value)
    }

    fn read_value(&self, reader: &mut PayloadReader<'_>, depth: usize) -> Result<Value> {
        let tag = reader.read_tag()?;
        match tag {
            WireType::None => Ok(Value::None),
            WireType::UInt32 => Ok(Value::UInt(reader.read_u32()?)),
            WireType::Int32 => Ok(Value::Int(reader.read_i32()?)),
            WireType::String => Ok(Value::String(reader.read_string()?)),
            WireType::Bin => Ok(Value::Binary(reader.read_binary()?)),
            WireType::List => {
                if depth >= MAX_NESTING {
                    return Err(DecodeError::TooDeep(MAX_NESTING));
                }
                let count = reader.read_u32()? as usize;
                let mut items = Vec::with_capacity(count.min(reader.remaining() / 4));
                for _ in 0..count {
                    items.push(self.read_value(reader, depth + 1)?);
                }
                Ok(Value::List(items))
            }
            WireType::Dict => self.read_dict(reader).map(Value::Dict),
            WireType::PropDict => self.read_propdict(reader).map(Value::PropDict),
        }
    }

    fn read_dict(&self, reader: &mut PayloadReader<'_>) -> Result<Dict> {
        let count = reader.read_u32()?;
        let mut stream = self.slot.begin_stream();
        for _ in 0..count {
            let key = reader.read_string()?;
            let value = read_scalar(reader, "dict")?;
            if !stream.insert(key, value) {
                trace!("Discarded dict entry with empty key");
            }
        }
        Ok(stream.finish_dict())
    }

    fn read_propdict(&self, reader: &mut PayloadReader<'_>) -> Result<PropDict> {
        let count = reader.read_u32()?;
        let mut stream = self.slot.begin_stream();
        for _ in 0..count {
            let source = reader.read_string()?;
            let key = reader.read_string()?;
            let value = read_scalar(reader, "propdict")?;
            if !stream.append(key, value, source) {
                trace!("Discarded propdict entry with empty key");
            }
        }
        Ok(stream.finish_propdict())
    }
}

fn read_scalar(reader: &mut PayloadReader<'_>, container: &'static str) -> Result<String> {
    match reader.read_tag()? {
        WireType::None => Ok(String::new()),
        WireType::UInt32 => Ok(reader.read_u32()?.to_string()),
        WireType::Int32 => Ok(reader.read_i32()?.to_string()),
        WireType::String => reader.read_string(),
        WireType::Bin => Err(DecodeError::UnexpectedType {
            expected: "scalar",
            found: WireType::Bin.name(),
        }),
        WireType::Dict | WireType::List | WireType::PropDict => {
            Err(DecodeError::NestedContainer(container))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::put_string;
    use crate::id::RequestId;
    use bytes::{BufMut, BytesMut};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn reply(value: &Value) -> Frame {
        Frame::reply(RequestId(1), value).unwrap()
    }

    #[test]
    fn test_decode_scalars() {
        let decoder = ResultDecoder::new();
        for value in [
            Value::None,
            Value::UInt(42),
            Value::Int(-3),
            Value::from("hello"),
            Value::Binary(vec![1, 2, 3]),
        ] {
            assert_eq!(
                decoder.decode(&reply(&value)).unwrap(),
                Reply::Value(value)
            );
        }
    }

    #[test]
    fn test_decode_error_frame() {
        let decoder = ResultDecoder::new();
        let frame = Frame::error(RequestId(9), "No such entry");
        assert_eq!(
            decoder.decode(&frame).unwrap(),
            Reply::DaemonError("No such entry".to_string())
        );
    }

    #[test]
    fn test_decode_dict_stream_discards_empty_keys() {
        let mut payload = BytesMut::new();
        payload.put_u32(WireType::Dict as u32);
        payload.put_u32(3);
        for (key, value) in [("foo", "bar"), ("", "lost"), ("baz", "qux")] {
            put_string(key, &mut payload);
            payload.put_u32(WireType::String as u32);
            put_string(value, &mut payload);
        }

        let decoder = ResultDecoder::new();
        let value = decoder.decode_value(&payload).unwrap();
        let dict = value.as_dict().unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get("foo"), Some("bar"));
        assert_eq!(dict.get("baz"), Some("qux"));
        assert!(!decoder.slot().is_busy());
    }

    #[test]
    fn test_decode_propdict_keeps_every_source() {
        let mut payload = BytesMut::new();
        payload.put_u32(WireType::PropDict as u32);
        payload.put_u32(2);
        for (source, value) in [("plugin/id3v2", "Tagged"), ("client/x", "Edited")] {
            put_string(source, &mut payload);
            put_string("artist", &mut payload);
            payload.put_u32(WireType::String as u32);
            put_string(value, &mut payload);
        }

        let value = ResultDecoder::new().decode_value(&payload).unwrap();
        let props = value.as_propdict().unwrap();
        let entries = props.entries("artist");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, "plugin/id3v2");
        assert_eq!(entries[1].value, "Edited");
    }

    #[test]
    fn test_integer_dict_values_become_strings() {
        let mut payload = BytesMut::new();
        payload.put_u32(WireType::Dict as u32);
        payload.put_u32(1);
        put_string("duration", &mut payload);
        payload.put_u32(WireType::UInt32 as u32);
        payload.put_u32(1000);

        let value = ResultDecoder::new().decode_value(&payload).unwrap();
        assert_eq!(value.as_dict().unwrap().get("duration"), Some("1000"));
    }

    #[test]
    fn test_nested_container_in_dict_fails_and_releases_slot() {
        let mut payload = BytesMut::new();
        payload.put_u32(WireType::Dict as u32);
        payload.put_u32(1);
        put_string("inner", &mut payload);
        payload.put_u32(WireType::List as u32);
        payload.put_u32(0);

        let decoder = ResultDecoder::new();
        assert_eq!(
            decoder.decode_value(&payload),
            Err(DecodeError::NestedContainer("dict"))
        );
        assert!(!decoder.slot().is_busy());
    }

    #[test]
    fn test_truncated_and_trailing_payloads() {
        let decoder = ResultDecoder::new();
        assert_eq!(
            decoder.decode_value(&[0, 0, 0, 1, 0, 0]),
            Err(DecodeError::Truncated("uint32"))
        );
        assert_eq!(
            decoder.decode_value(&[0, 0, 0, 0, 9]),
            Err(DecodeError::TrailingBytes(1))
        );
        assert_eq!(
            decoder.decode_value(&[0, 0, 0, 99]),
            Err(DecodeError::UnknownTag(99))
        );
    }

    #[test]
    fn test_nesting_limit() {
        fn nested(depth: usize) -> Vec<u8> {
            let mut payload = Vec::with_capacity(depth * 8 + 4);
            for _ in 0..depth {
                payload.extend_from_slice(&5i32.to_be_bytes());
                payload.extend_from_slice(&1u32.to_be_bytes());
            }
            payload.extend_from_slice(&0i32.to_be_bytes());
            payload
        }

        let decoder = ResultDecoder::new();
        assert!(decoder.decode_value(&nested(MAX_NESTING)).is_ok());
        assert_eq!(
            decoder.decode_value(&nested(MAX_NESTING + 1)),
            Err(DecodeError::TooDeep(MAX_NESTING))
        );

        // Far below the frame limit, yet deep enough to exhaust the stack
        assert_eq!(
            decoder.decode_value(&nested(500_000)),
            Err(DecodeError::TooDeep(MAX_NESTING))
        );
    }

    #[test]
    fn test_list_of_dicts() {
        let first: Dict = [("id", "1")].into_iter().collect();
        let second: Dict = [("id", "2")].into_iter().collect();
        let value = Value::List(vec![Value::Dict(first), Value::Dict(second)]);

        let decoded = ResultDecoder::new().decode(&reply(&value)).unwrap();
        assert_eq!(decoded, Reply::Value(value));
    }

    #[test]
    fn test_second_stream_waits_for_first() {
        let slot = Arc::new(DecodeSlot::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let slot = slot.clone();
                let active = active.clone();
                let max_active = max_active.clone();
                thread::spawn(move || {
                    let mut stream = slot.begin_stream();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    for i in 0..5 {
                        stream.insert(format!("t{}-{}", n, i), n.to_string());
                        thread::sleep(Duration::from_millis(2));
                    }
                    active.fetch_sub(1, Ordering::SeqCst);
                    stream.finish_dict()
                })
            })
            .collect();

        for (n, handle) in handles.into_iter().enumerate() {
            let dict = handle.join().unwrap();
            assert_eq!(dict.len(), 5);
            assert!(dict.iter().all(|(_, v)| v == n.to_string()));
        }
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(!slot.is_busy());
    }
}
