//! Message ledger: ciphertext-only items with available/consumed state.
//!
//! State transitions never rewrite a record. Acknowledging a message
//! appends a copy with `state = consumed` and repoints the fingerprint's
//! index entry at it, so the log keeps the full history.
//!
//! Per-conversation order lists may hold the same fingerprint more than
//! once (a re-delivered envelope is appended again). Readers walk them
//! with a seen-set so each fingerprint is returned at most once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{RelayError, Result};
use crate::paths::MESSAGES_STORE;
use crate::store::{AppendStore, ReplayReport};

pub const RETENTION_SECS: i64 = 60 * 60 * 24 * 30;
pub const DEFAULT_FETCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Available,
    Consumed,
}

/// A stored ciphertext unit. There is no plaintext field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageItem {
    pub owner_subject: String,
    pub conversation_id: String,
    pub payload_ciphertext_b64: String,
    pub envelope_fingerprint: String,
    pub created_at_unix: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expires_at_unix: i64,
    pub state: MessageState,
}

impl MessageItem {
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at_unix > 0 && now_unix > self.expires_at_unix
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub owner_subject: String,
    pub conversation_id: String,
    pub offset: u64,
    pub created_at_unix: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expires_at_unix: i64,
    pub state: MessageState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerIndex {
    /// owner → conversation → fingerprints in append order.
    #[serde(default)]
    pub owner_conv_order: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    /// fingerprint → latest record.
    #[serde(default)]
    pub fingerprint: BTreeMap<String, FingerprintEntry>,
}

impl LedgerIndex {
    fn record(&mut self, item: &MessageItem, offset: u64) {
        self.owner_conv_order
            .entry(item.owner_subject.clone())
            .or_default()
            .entry(item.conversation_id.clone())
            .or_default()
            .push(item.envelope_fingerprint.clone());
        self.repoint(item, offset);
    }

    fn repoint(&mut self, item: &MessageItem, offset: u64) {
        self.fingerprint.insert(
            item.envelope_fingerprint.clone(),
            FingerprintEntry {
                owner_subject: item.owner_subject.clone(),
                conversation_id: item.conversation_id.clone(),
                offset,
                created_at_unix: item.created_at_unix,
                expires_at_unix: item.expires_at_unix,
                state: item.state,
            },
        );
    }
}

pub struct MessageLedger {
    store: AppendStore<LedgerIndex>,
    clock: Arc<dyn Clock>,
}

impl MessageLedger {
    pub fn open<P: AsRef<Path>>(dir: P, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            store: AppendStore::open(dir, MESSAGES_STORE)?,
            clock,
        })
    }

    /// Store an available ciphertext payload; the only write path for both
    /// sent and received messages.
    pub fn put_available(
        &self,
        owner_subject: &str,
        conversation_id: &str,
        payload_ciphertext_b64: &str,
        fingerprint: &str,
    ) -> Result<String> {
        if owner_subject.is_empty() {
            return Err(RelayError::invalid("owner_subject"));
        }
        if conversation_id.is_empty() {
            return Err(RelayError::invalid("conversation_id"));
        }
        if payload_ciphertext_b64.is_empty() {
            return Err(RelayError::invalid("payload_ciphertext_b64"));
        }
        if fingerprint.is_empty() {
            return Err(RelayError::invalid("envelope_fingerprint"));
        }

        let now = self.clock.now_unix();
        let item = MessageItem {
            owner_subject: owner_subject.to_string(),
            conversation_id: conversation_id.to_string(),
            payload_ciphertext_b64: payload_ciphertext_b64.to_string(),
            envelope_fingerprint: fingerprint.to_string(),
            created_at_unix: now,
            expires_at_unix: now + RETENTION_SECS,
            state: MessageState::Available,
        };

        let guard = self.store.lock();
        let offset = guard.append_record(&item)?;
        let mut index = guard.read_index()?;
        index.record(&item, offset);
        guard.write_index(&index)?;

        debug!(conversation_id, bytes = payload_ciphertext_b64.len(), "message stored");
        Ok(item.envelope_fingerprint)
    }

    /// Available items for `owner_subject` across all conversations, newest
    /// first. A `limit` of zero means the default.
    pub fn fetch_inbox(&self, owner_subject: &str, limit: usize) -> Result<Vec<MessageItem>> {
        if owner_subject.is_empty() {
            return Err(RelayError::invalid("owner_subject"));
        }
        let limit = effective_limit(limit);

        let guard = self.store.lock();
        let index = guard.read_index()?;

        let mut seen = HashSet::new();
        let mut rows: Vec<&FingerprintEntry> = index
            .owner_conv_order
            .get(owner_subject)
            .into_iter()
            .flat_map(|convs| convs.values())
            .flatten()
            .filter(|fp| seen.insert(fp.as_str()))
            .filter_map(|fp| index.fingerprint.get(fp))
            .filter(|meta| meta.owner_subject == owner_subject)
            .filter(|meta| meta.state == MessageState::Available)
            .collect();
        // Newest first; the later log offset breaks same-second ties.
        rows.sort_by(|a, b| {
            b.created_at_unix
                .cmp(&a.created_at_unix)
                .then(b.offset.cmp(&a.offset))
        });

        let mut out = Vec::with_capacity(limit.min(rows.len()));
        for meta in rows {
            if out.len() >= limit {
                break;
            }
            match guard.read_record_at::<MessageItem>(meta.offset) {
                Ok(item) => out.push(item),
                Err(err) => {
                    debug!(offset = meta.offset, error = %err, "skipping unreadable inbox record");
                }
            }
        }
        Ok(out)
    }

    /// Items in one conversation, newest first.
    ///
    /// With `include_consumed` the history view is returned; otherwise only
    /// items still waiting to be acknowledged.
    pub fn fetch_thread(
        &self,
        owner_subject: &str,
        conversation_id: &str,
        limit: usize,
        include_consumed: bool,
    ) -> Result<Vec<MessageItem>> {
        if owner_subject.is_empty() {
            return Err(RelayError::invalid("owner_subject"));
        }
        if conversation_id.is_empty() {
            return Err(RelayError::invalid("conversation_id"));
        }
        let limit = effective_limit(limit);

        let guard = self.store.lock();
        let index = guard.read_index()?;
        let order = match index
            .owner_conv_order
            .get(owner_subject)
            .and_then(|convs| convs.get(conversation_id))
        {
            Some(order) => order,
            None => return Ok(Vec::new()),
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for fp in order.iter().rev() {
            if out.len() >= limit {
                break;
            }
            if !seen.insert(fp.as_str()) {
                continue;
            }
            let Some(meta) = index.fingerprint.get(fp) else {
                continue;
            };
            if meta.owner_subject != owner_subject || meta.conversation_id != conversation_id {
                continue;
            }
            if !include_consumed && meta.state != MessageState::Available {
                continue;
            }
            match guard.read_record_at::<MessageItem>(meta.offset) {
                Ok(item) => out.push(item),
                Err(err) => {
                    debug!(offset = meta.offset, error = %err, "skipping unreadable thread record");
                }
            }
        }
        Ok(out)
    }

    /// Mark fingerprints consumed. Unknown, foreign, mismatched or already
    /// consumed fingerprints are skipped; the return value counts only real
    /// transitions.
    pub fn ack_available(
        &self,
        owner_subject: &str,
        conversation_id: Option<&str>,
        fingerprints: &[String],
    ) -> Result<usize> {
        if owner_subject.is_empty() {
            return Err(RelayError::invalid("owner_subject"));
        }
        if fingerprints.is_empty() {
            return Err(RelayError::invalid("envelope_fingerprints"));
        }
        let conversation_id = conversation_id.map(str::trim).filter(|c| !c.is_empty());

        let guard = self.store.lock();
        let mut index = guard.read_index()?;
        let mut acked = 0;

        for fp in fingerprints.iter().map(|fp| fp.trim()) {
            if fp.is_empty() {
                continue;
            }
            let Some(meta) = index.fingerprint.get(fp) else {
                continue;
            };
            if meta.owner_subject != owner_subject {
                continue;
            }
            if conversation_id.is_some_and(|c| meta.conversation_id != c) {
                continue;
            }
            if meta.state != MessageState::Available {
                continue;
            }

            let previous: MessageItem = match guard.read_record_at(meta.offset) {
                Ok(item) => item,
                Err(err) => {
                    debug!(offset = meta.offset, error = %err, "skipping unreadable record on ack");
                    continue;
                }
            };
            let consumed = MessageItem {
                state: MessageState::Consumed,
                ..previous
            };
            let offset = guard.append_record(&consumed)?;
            index.repoint(&consumed, offset);
            acked += 1;
        }

        if acked > 0 {
            guard.write_index(&index)?;
            info!(acked, "messages acknowledged");
        }
        Ok(acked)
    }

    /// Rebuild the index by replaying the log.
    pub fn reindex(&self) -> Result<ReplayReport> {
        let guard = self.store.lock();
        let mut index = LedgerIndex::default();
        let report = guard.replay(|offset, item: MessageItem| {
            if item.envelope_fingerprint.is_empty() {
                return;
            }
            match item.state {
                MessageState::Available => index.record(&item, offset),
                MessageState::Consumed => index.repoint(&item, offset),
            }
        })?;
        guard.write_index(&index)?;
        info!(
            records = report.records,
            skipped = report.skipped,
            messages = index.fingerprint.len(),
            "message index rebuilt"
        );
        Ok(report)
    }

    pub fn log_len(&self) -> Result<u64> {
        self.store.log_len()
    }

    pub fn now_unix(&self) -> i64 {
        self.clock.now_unix()
    }
}

fn effective_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_FETCH_LIMIT
    } else {
        limit
    }
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}
