//! Transport capability: send raw envelope bytes, hand inbound bytes to one
//! receive handler.
//!
//! Exactly four operations. Nothing mixnet-specific crosses this boundary;
//! the orchestrator only ever sees encoded envelopes.

use std::sync::Arc;
use thiserror::Error;

mod mixnet;
mod mock;

pub use mixnet::{MixnetAdapter, MixnetClient};
pub use mock::MockTransport;

/// Inbound bytes callback. Errors are reported back to the transport, which
/// decides whether to log or drop them.
pub type ReceiveHandler = Arc<dyn Fn(&[u8]) -> crate::Result<()> + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("envelope too large ({size} > {max} bytes)")]
    EnvelopeTooLarge { size: usize, max: usize },

    #[error("no receive handler installed")]
    NoReceiveHandler,

    #[error("transport already started")]
    AlreadyStarted,

    #[error("transport not started")]
    NotStarted,

    #[error("mixnet: {0}")]
    Mixnet(String),
}

pub trait Transport: Send + Sync {
    /// Hand one encoded envelope to the network. Oversized payloads are
    /// rejected before any network work.
    fn send(&self, envelope: &[u8]) -> Result<(), TransportError>;

    /// Install the single receive handler, replacing any previous one.
    fn set_receive_handler(&self, handler: ReceiveHandler) -> Result<(), TransportError>;

    fn start(&self) -> Result<(), TransportError>;

    /// Idempotent.
    fn stop(&self) -> Result<(), TransportError>;
}

pub(crate) fn check_size(envelope: &[u8], max: usize) -> Result<(), TransportError> {
    if envelope.len() > max {
        return Err(TransportError::EnvelopeTooLarge {
            size: envelope.len(),
            max,
        });
    }
    Ok(())
}
