//! Conversation registry: peer fingerprint → stable conversation identity.
//!
//! Peer fingerprints are internal lookup keys. They are never logged and
//! never leave this module except inside the stored record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::crypto::opaque_id;
use crate::error::{RelayError, Result};
use crate::paths::CONVERSATIONS_STORE;
use crate::store::{AppendStore, ReplayReport};

pub const CONVERSATION_ID_PREFIX: &str = "conv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub owner_subject: String,
    pub conversation_id: String,
    pub peer_fingerprint: String,
    /// Opaque, stored as given, never used for lookup.
    #[serde(default, with = "crate::b64::nullable")]
    pub peer_ref_encrypted: Vec<u8>,
    pub created_at_unix: i64,
    pub state: ConversationState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationIndex {
    #[serde(default)]
    pub fingerprint_to_id: BTreeMap<String, String>,
    #[serde(default)]
    pub id_to_offset: BTreeMap<String, u64>,
}

pub struct ConversationRegistry {
    store: AppendStore<ConversationIndex>,
    clock: Arc<dyn Clock>,
}

impl ConversationRegistry {
    pub fn open<P: AsRef<Path>>(dir: P, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            store: AppendStore::open(dir, CONVERSATIONS_STORE)?,
            clock,
        })
    }

    /// Idempotent by `peer_fingerprint` alone.
    ///
    /// The lookup is global, not scoped by owner: a second owner presenting
    /// the same fingerprint receives the first owner's conversation record.
    pub fn create_or_get(
        &self,
        owner_subject: &str,
        peer_fingerprint: &str,
        peer_ref_encrypted: &[u8],
    ) -> Result<Conversation> {
        if owner_subject.is_empty() {
            return Err(RelayError::invalid("owner_subject"));
        }
        if peer_fingerprint.is_empty() {
            return Err(RelayError::invalid("peer_fingerprint"));
        }

        let guard = self.store.lock();
        let mut index = guard.read_index()?;
        if let Some(existing) = index.fingerprint_to_id.get(peer_fingerprint) {
            if !existing.is_empty() {
                let existing = existing.clone();
                drop(guard);
                debug!(conversation_id = %existing, "conversation already registered");
                return self.get(&existing);
            }
        }

        let now = self.clock.now_unix();
        let conversation = Conversation {
            owner_subject: owner_subject.to_string(),
            conversation_id: new_conversation_id(now),
            peer_fingerprint: peer_fingerprint.to_string(),
            peer_ref_encrypted: peer_ref_encrypted.to_vec(),
            created_at_unix: now,
            state: ConversationState::Active,
        };

        // Record first, index second: a crash in between leaves an orphan
        // record that `reindex` recovers.
        let offset = guard.append_record(&conversation)?;
        index
            .id_to_offset
            .insert(conversation.conversation_id.clone(), offset);
        index.fingerprint_to_id.insert(
            conversation.peer_fingerprint.clone(),
            conversation.conversation_id.clone(),
        );
        guard.write_index(&index)?;

        info!(conversation_id = %conversation.conversation_id, "conversation created");
        Ok(conversation)
    }

    pub fn get(&self, conversation_id: &str) -> Result<Conversation> {
        if conversation_id.is_empty() {
            return Err(RelayError::invalid("conversation_id"));
        }
        let guard = self.store.lock();
        let index = guard.read_index()?;
        let offset = *index
            .id_to_offset
            .get(conversation_id)
            .ok_or(RelayError::NotFound)?;
        let conversation: Conversation = guard.read_record_at(offset)?;
        if conversation.conversation_id != conversation_id {
            return Err(RelayError::NotFound);
        }
        Ok(conversation)
    }

    /// Rebuild the index from the log alone and replace it atomically.
    pub fn reindex(&self) -> Result<ReplayReport> {
        let guard = self.store.lock();
        let mut index = ConversationIndex::default();
        let report = guard.replay(|offset, conversation: Conversation| {
            if conversation.conversation_id.is_empty() {
                return;
            }
            index
                .fingerprint_to_id
                .entry(conversation.peer_fingerprint.clone())
                .or_insert_with(|| conversation.conversation_id.clone());
            index
                .id_to_offset
                .insert(conversation.conversation_id, offset);
        })?;
        index.fingerprint_to_id.remove("");
        guard.write_index(&index)?;
        info!(
            records = report.records,
            skipped = report.skipped,
            conversations = index.id_to_offset.len(),
            "conversation index rebuilt"
        );
        Ok(report)
    }

    pub fn log_len(&self) -> Result<u64> {
        self.store.log_len()
    }
}

/// The random part carries uniqueness; the suffix is the creation time in
/// nanoseconds at clock resolution.
fn new_conversation_id(now_unix: i64) -> String {
    let nanos = now_unix.saturating_mul(1_000_000_000);
    format!("{}_{}", opaque_id(CONVERSATION_ID_PREFIX), nanos)
}
