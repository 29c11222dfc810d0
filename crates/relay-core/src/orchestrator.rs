//! Binds sealing, storage and transport together.
//!
//! Send path: ownership check → seal → envelope → size cap → ledger → transport.
//! Receive path: decode → validate → locate conversation → ledger.
//! Plaintext exists only inside `send_text`; what reaches the ledger and the
//! transport is always the encoded, sealed envelope.

use base64::{engine::general_purpose, Engine as _};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::conversations::ConversationRegistry;
use crate::crypto::{self, TransientKey};
use crate::envelope::Envelope;
use crate::error::{RelayError, Result};
use crate::ledger::MessageLedger;
use crate::transport::{ReceiveHandler, Transport, TransportError};

/// Status returned once the envelope is stored and handed off. Delivery
/// over the mixnet may still be pending.
pub const SENT: &str = "Sent";

pub struct Orchestrator {
    registry: Arc<ConversationRegistry>,
    ledger: Arc<MessageLedger>,
    transport: Arc<dyn Transport>,
    key: TransientKey,
    max_envelope_bytes: usize,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    /// A fresh sealing key is generated here and lives as long as this value.
    pub fn new(
        registry: Arc<ConversationRegistry>,
        ledger: Arc<MessageLedger>,
        transport: Arc<dyn Transport>,
        max_envelope_bytes: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            ledger,
            transport,
            key: TransientKey::generate(),
            max_envelope_bytes,
            clock,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Install `on_receive_envelope` as the transport's receive handler.
    ///
    /// The handler holds a weak reference so the transport does not keep the
    /// orchestrator alive.
    pub fn attach(self: &Arc<Self>) -> std::result::Result<(), TransportError> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handler: ReceiveHandler = Arc::new(move |raw: &[u8]| match weak.upgrade() {
            Some(orchestrator) => orchestrator.on_receive_envelope(raw),
            None => Err(RelayError::Transport(TransportError::NotStarted)),
        });
        self.transport.set_receive_handler(handler)
    }

    pub fn send_text(
        &self,
        owner_subject: &str,
        conversation_id: &str,
        plaintext: &str,
    ) -> Result<&'static str> {
        if owner_subject.is_empty() {
            return Err(RelayError::invalid("owner_subject"));
        }
        if conversation_id.is_empty() {
            return Err(RelayError::invalid("conversation_id"));
        }
        if plaintext.is_empty() {
            return Err(RelayError::invalid("plaintext"));
        }

        match self.registry.get(conversation_id) {
            Ok(conv) if conv.owner_subject == owner_subject => {}
            Ok(_) | Err(RelayError::NotFound) | Err(RelayError::InvalidArgument(_)) => {
                return Err(RelayError::UnknownConversation)
            }
            Err(err) => return Err(err),
        }

        let ciphertext = crypto::seal(&self.key, plaintext.as_bytes())?;
        let envelope = Envelope::new(conversation_id, ciphertext, self.clock.now_unix());
        let encoded = envelope.encode()?;
        if encoded.len() > self.max_envelope_bytes {
            return Err(RelayError::EnvelopeTooLarge {
                size: encoded.len(),
                max: self.max_envelope_bytes,
            });
        }

        let fingerprint = crypto::fingerprint(&encoded);
        let payload = general_purpose::STANDARD.encode(&encoded);
        self.ledger
            .put_available(owner_subject, conversation_id, &payload, &fingerprint)?;
        self.transport.send(&encoded)?;

        info!(conversation_id, bytes = encoded.len(), "envelope sent");
        Ok(SENT)
    }

    /// Store an inbound envelope for the conversation's owner. Nothing is
    /// decrypted here.
    pub fn on_receive_envelope(&self, raw: &[u8]) -> Result<()> {
        if raw.is_empty() {
            return Err(RelayError::invalid("envelope bytes"));
        }
        let envelope = Envelope::decode(raw)?;
        let conv = match self.registry.get(&envelope.conversation_id) {
            Ok(conv) => conv,
            Err(RelayError::NotFound) | Err(RelayError::InvalidArgument(_)) => {
                debug!(bytes = raw.len(), "inbound envelope for unknown conversation");
                return Err(RelayError::UnknownConversation);
            }
            Err(err) => return Err(err),
        };
        if conv.owner_subject.is_empty() {
            warn!(conversation_id = %conv.conversation_id, "conversation has no owner");
            return Err(RelayError::UnknownConversation);
        }

        let fingerprint = crypto::fingerprint(raw);
        let payload = general_purpose::STANDARD.encode(raw);
        self.ledger.put_available(
            &conv.owner_subject,
            &conv.conversation_id,
            &payload,
            &fingerprint,
        )?;
        info!(conversation_id = %conv.conversation_id, bytes = raw.len(), "envelope received");
        Ok(())
    }
}
