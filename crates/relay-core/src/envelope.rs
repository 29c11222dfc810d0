//! Versioned envelope: the unit handed to the transport and stored at rest.
//!
//! `ciphertext` is always sealed before it gets here; plaintext only ever
//! exists in the caller's stack frame.

use serde::{Deserialize, Serialize};

pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("bad envelope version {0}")]
    BadVersion(u32),
    #[error("missing conversation_id")]
    MissingConversationId,
    #[error("missing ciphertext")]
    MissingCiphertext,
    #[error("missing created_at_unix")]
    MissingCreatedAt,
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u32,

    pub conversation_id: String,

    /// Opaque sender reference. Never used for lookup.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "crate::b64")]
    pub sender_ref_encrypted: Vec<u8>,

    #[serde(default, with = "crate::b64")]
    pub ciphertext: Vec<u8>,

    #[serde(default)]
    pub created_at_unix: i64,
}

impl Envelope {
    pub fn new(conversation_id: impl Into<String>, ciphertext: Vec<u8>, created_at_unix: i64) -> Self {
        Self {
            v: ENVELOPE_VERSION,
            conversation_id: conversation_id.into(),
            sender_ref_encrypted: Vec::new(),
            ciphertext,
            created_at_unix,
        }
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.v != ENVELOPE_VERSION {
            return Err(EnvelopeError::BadVersion(self.v));
        }
        if self.conversation_id.is_empty() {
            return Err(EnvelopeError::MissingConversationId);
        }
        if self.ciphertext.is_empty() {
            return Err(EnvelopeError::MissingCiphertext);
        }
        if self.created_at_unix <= 0 {
            return Err(EnvelopeError::MissingCreatedAt);
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        envelope.validate()?;
        Ok(envelope)
    }
}
