//! The logical operation surface consumed by outer request layers.
//!
//! `Relay` owns every service object for one process. Callers arrive with
//! an already-verified `auth_subject`; message operations additionally need
//! a session whose purpose and scope match the request exactly.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::conversations::{Conversation, ConversationRegistry};
use crate::error::{RelayError, Result};
use crate::ledger::{MessageItem, MessageLedger};
use crate::orchestrator::Orchestrator;
use crate::sessions::{Purpose, Session, SessionAuthority, SessionScope};
use crate::store::ReplayReport;
use crate::transport::Transport;

/// Replay outcome for both stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReindexSummary {
    pub conversations: ReplayReport,
    pub messages: ReplayReport,
}

pub struct Relay {
    sessions: Arc<SessionAuthority>,
    registry: Arc<ConversationRegistry>,
    ledger: Arc<MessageLedger>,
    orchestrator: Arc<Orchestrator>,
}

impl Relay {
    /// Open both stores under `config.storage_dir` and wire the orchestrator
    /// to `transport`. The transport is not started here.
    pub fn open(
        config: &RelayConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let registry = Arc::new(ConversationRegistry::open(
            config.conversations_dir(),
            clock.clone(),
        )?);
        let ledger = Arc::new(MessageLedger::open(config.messages_dir(), clock.clone())?);
        let sessions = Arc::new(SessionAuthority::new(config.session_ttl(), clock.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            ledger.clone(),
            transport,
            config.max_envelope_bytes,
            clock,
        ));
        orchestrator.attach()?;

        info!(
            storage = %config.storage_dir.display(),
            max_envelope_bytes = config.max_envelope_bytes,
            "relay opened"
        );
        Ok(Self {
            sessions,
            registry,
            ledger,
            orchestrator,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionAuthority> {
        &self.sessions
    }

    pub fn start(&self) -> Result<()> {
        self.orchestrator.transport().start()?;
        info!("transport started");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.orchestrator.transport().stop()?;
        info!("transport stopped");
        Ok(())
    }

    pub fn issue_session(
        &self,
        auth_subject: &str,
        purpose: &str,
        conversation_id: Option<&str>,
    ) -> Result<Session> {
        let purpose: Purpose = purpose.parse()?;
        self.sessions.issue(auth_subject, purpose, conversation_id)
    }

    pub fn validate_session(
        &self,
        session_id: &str,
        auth_subject: &str,
        purpose: Purpose,
    ) -> Result<Session> {
        self.sessions.validate(session_id, auth_subject, purpose)
    }

    pub fn revoke_session(&self, session_id: &str, auth_subject: &str) -> Result<()> {
        self.sessions.revoke(session_id, auth_subject)
    }

    pub fn cleanup_sessions(&self) -> usize {
        self.sessions.cleanup()
    }

    /// No session needed: only the authenticated subject.
    pub fn create_conversation(
        &self,
        owner_subject: &str,
        peer_fingerprint: &str,
        peer_ref_encrypted: Option<&[u8]>,
    ) -> Result<Conversation> {
        let peer_fingerprint = require(peer_fingerprint, "peer_fingerprint")?;
        self.registry.create_or_get(
            owner_subject,
            peer_fingerprint,
            peer_ref_encrypted.unwrap_or_default(),
        )
    }

    pub fn send(
        &self,
        session_id: &str,
        auth_subject: &str,
        conversation_id: &str,
        plaintext: &str,
    ) -> Result<&'static str> {
        require(session_id, "session_id")?;
        let conversation_id = require(conversation_id, "conversation_id")?;
        require(plaintext, "plaintext")?;
        self.authorize(
            session_id,
            auth_subject,
            Purpose::MessageSend,
            SessionScope::Conversation(conversation_id),
        )?;
        self.orchestrator
            .send_text(auth_subject, conversation_id, plaintext)
    }

    pub fn on_receive_envelope(&self, raw: &[u8]) -> Result<()> {
        self.orchestrator.on_receive_envelope(raw)
    }

    pub fn inbox(
        &self,
        session_id: &str,
        auth_subject: &str,
        limit: usize,
    ) -> Result<Vec<MessageItem>> {
        require(session_id, "session_id")?;
        self.authorize(
            session_id,
            auth_subject,
            Purpose::MessageReceive,
            SessionScope::Inbox,
        )?;
        self.ledger.fetch_inbox(auth_subject, limit)
    }

    /// `include_consumed` defaults to the full history view.
    pub fn thread(
        &self,
        session_id: &str,
        auth_subject: &str,
        conversation_id: &str,
        limit: usize,
        include_consumed: Option<bool>,
    ) -> Result<Vec<MessageItem>> {
        require(session_id, "session_id")?;
        let conversation_id = require(conversation_id, "conversation_id")?;
        self.authorize(
            session_id,
            auth_subject,
            Purpose::MessageReceive,
            SessionScope::Conversation(conversation_id),
        )?;
        self.ledger.fetch_thread(
            auth_subject,
            conversation_id,
            limit,
            include_consumed.unwrap_or(true),
        )
    }

    /// A conversation id needs a session scoped to it; without one the
    /// session must be inbox-scoped.
    pub fn ack(
        &self,
        session_id: &str,
        auth_subject: &str,
        conversation_id: Option<&str>,
        fingerprints: &[String],
    ) -> Result<usize> {
        require(session_id, "session_id")?;
        if fingerprints.is_empty() {
            return Err(RelayError::invalid("envelope_fingerprints"));
        }
        let conversation_id = conversation_id.map(str::trim).filter(|id| !id.is_empty());
        let scope = SessionScope::from_conversation(conversation_id);
        self.authorize(session_id, auth_subject, Purpose::MessageReceive, scope)?;
        self.ledger
            .ack_available(auth_subject, conversation_id, fingerprints)
    }

    /// Rebuild both indexes from their logs.
    pub fn reindex(&self) -> Result<ReindexSummary> {
        Ok(ReindexSummary {
            conversations: self.registry.reindex()?,
            messages: self.ledger.reindex()?,
        })
    }

    fn authorize(
        &self,
        session_id: &str,
        auth_subject: &str,
        purpose: Purpose,
        scope: SessionScope<'_>,
    ) -> Result<Session> {
        let session = self.sessions.validate(session_id, auth_subject, purpose)?;
        if !session.covers(scope) {
            debug!(purpose = %purpose, "session scope mismatch");
            return Err(RelayError::Forbidden);
        }
        Ok(session)
    }
}

/// Trimmed `value`, or `InvalidArgument` when nothing is left.
fn require<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RelayError::invalid(what));
    }
    Ok(value)
}
