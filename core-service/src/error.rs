use core_client::ClientError;
use core_protocol::RequestKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error(transparent)]
    Config(#[from] core_runtime::Error),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Unexpected reply to {request:?}: expected {expected}, got {found}")]
    UnexpectedReply {
        request: RequestKind,
        expected: &'static str,
        found: &'static str,
    },
}

impl ServiceError {
    /// The client error behind this failure, if any.
    pub fn client_error(&self) -> Option<&ClientError> {
        match self {
            ServiceError::Client(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
