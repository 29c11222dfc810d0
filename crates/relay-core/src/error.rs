use thiserror::Error;

use crate::envelope::EnvelopeError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found")]
    NotFound,

    #[error("forbidden for caller")]
    Forbidden,

    #[error("session expired")]
    Expired,

    #[error("session revoked")]
    Revoked,

    #[error("invalid session purpose")]
    InvalidPurpose,

    /// Absent and foreign conversations are reported identically.
    #[error("unknown conversation")]
    UnknownConversation,

    #[error("envelope too large ({size} > {max} bytes)")]
    EnvelopeTooLarge { size: usize, max: usize },

    #[error("envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("crypto: {0}")]
    Crypto(String),

    #[error("corrupt store data: {0}")]
    Corrupt(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialisation: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl RelayError {
    pub(crate) fn invalid(what: &str) -> Self {
        RelayError::InvalidArgument(format!("{what} required"))
    }
}
