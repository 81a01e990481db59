use thiserror::Error;

/// Failure to interpret a frame payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload truncated while reading {0}")]
    Truncated(&'static str),

    #[error("Unknown value tag: {0}")]
    UnknownTag(i32),

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unexpected value type: expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Container values are not allowed inside a {0}")]
    NestedContainer(&'static str),

    #[error("Lists nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
}

/// Failure to frame or encode a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame payload of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("Argument cannot be sent to the daemon: {0}")]
    UnsupportedArgument(&'static str),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
