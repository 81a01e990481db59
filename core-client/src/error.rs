use bridge_traits::error::BridgeError;
use core_protocol::{CodecError, DecodeError};
use core_runtime::events::ErrorKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Daemon returned an error: {0}")]
    Protocol(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled: connection closed")]
    Cancelled,

    #[error("Not connected to the daemon")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Category reported in [`ClientEvent::Error`](core_runtime::events::ClientEvent::Error).
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connection(_) | ClientError::NotConnected => ErrorKind::Connection,
            ClientError::Protocol(_) => ErrorKind::Protocol,
            ClientError::Decode(_) => ErrorKind::Decode,
            ClientError::Timeout(_) => ErrorKind::Timeout,
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::Config(_) | ClientError::Internal(_) => ErrorKind::Rejected,
        }
    }

    /// Whether the error ends the connection it was raised on.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }
}

impl From<BridgeError> for ClientError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::InvalidAddress(msg) => ClientError::Config(msg),
            other => ClientError::Connection(other.to_string()),
        }
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            // An oversized header leaves the stream unsynchronised
            CodecError::FrameTooLarge { .. } => ClientError::Connection(err.to_string()),
            CodecError::UnsupportedArgument(_) => ClientError::Internal(err.to_string()),
        }
    }
}

impl From<core_runtime::Error> for ClientError {
    fn from(err: core_runtime::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ClientError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            ClientError::Protocol("no such key".into()).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            ClientError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(ClientError::NotConnected.kind(), ErrorKind::Connection);
        assert_eq!(
            ClientError::Internal("bad arg".into()).kind(),
            ErrorKind::Rejected
        );
    }

    #[test]
    fn test_oversized_frame_is_connection_loss() {
        let err: ClientError = CodecError::FrameTooLarge {
            length: 10,
            limit: 5,
        }
        .into();
        assert!(err.is_connection_loss());

        let err: ClientError = CodecError::UnsupportedArgument("dict").into();
        assert!(!err.is_connection_loss());
    }

    #[test]
    fn test_bridge_errors() {
        let err: ClientError = BridgeError::InvalidAddress("x".into()).into();
        assert_eq!(err, ClientError::Config("x".into()));

        let err: ClientError = BridgeError::ConnectionFailed("refused".into()).into();
        assert!(err.is_connection_loss());
    }
}
