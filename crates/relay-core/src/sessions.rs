//! Short-lived, purpose-scoped authorisation tickets.
//!
//! Sessions live only in memory. A session authorises one purpose for one
//! subject, either for a single conversation or (receive only) for the
//! caller's whole inbox. Session ids are bearer secrets and are never logged.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::crypto::opaque_id;
use crate::error::{RelayError, Result};

pub const SESSION_ID_PREFIX: &str = "sess";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    MessageSend,
    MessageReceive,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::MessageSend => "message_send",
            Purpose::MessageReceive => "message_receive",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "message_send" => Ok(Purpose::MessageSend),
            "message_receive" => Ok(Purpose::MessageReceive),
            other => Err(RelayError::InvalidArgument(format!(
                "unknown session purpose {other:?}"
            ))),
        }
    }
}

/// What a request wants to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope<'a> {
    Inbox,
    Conversation(&'a str),
}

impl<'a> SessionScope<'a> {
    /// `None` or an empty id means inbox scope.
    pub fn from_conversation(conversation_id: Option<&'a str>) -> Self {
        match conversation_id.map(str::trim) {
            Some(id) if !id.is_empty() => SessionScope::Conversation(id),
            _ => SessionScope::Inbox,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub auth_subject: String,
    pub purpose: Purpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub expires_at_unix: i64,
    pub revoked: bool,
}

impl Session {
    /// Exact scope match: an inbox session never covers a conversation and
    /// a conversation session never covers the inbox or another id.
    pub fn covers(&self, scope: SessionScope<'_>) -> bool {
        match (scope, self.conversation_id.as_deref()) {
            (SessionScope::Inbox, None) => true,
            (SessionScope::Conversation(want), Some(have)) => want == have,
            _ => false,
        }
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        now_unix > self.expires_at_unix
    }
}

pub struct SessionAuthority {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionAuthority {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(
        &self,
        auth_subject: &str,
        purpose: Purpose,
        conversation_id: Option<&str>,
    ) -> Result<Session> {
        if auth_subject.is_empty() {
            return Err(RelayError::invalid("auth_subject"));
        }
        let conversation_id = conversation_id
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if purpose == Purpose::MessageSend && conversation_id.is_none() {
            return Err(RelayError::InvalidArgument(
                "message_send requires conversation_id".into(),
            ));
        }

        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let session = Session {
            session_id: opaque_id(SESSION_ID_PREFIX),
            auth_subject: auth_subject.to_string(),
            purpose,
            conversation_id,
            expires_at_unix: self.clock.now_unix().saturating_add(ttl),
            revoked: false,
        };

        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        debug!(
            purpose = %purpose,
            inbox = session.conversation_id.is_none(),
            "session issued"
        );
        Ok(session)
    }

    /// Checks run in a fixed order so callers get a stable error for a
    /// session that fails more than one of them.
    pub fn validate(
        &self,
        session_id: &str,
        auth_subject: &str,
        expected: Purpose,
    ) -> Result<Session> {
        let sessions = self.sessions.read();
        let session = sessions.get(session_id).ok_or(RelayError::NotFound)?;
        if session.revoked {
            return Err(RelayError::Revoked);
        }
        if session.is_expired(self.clock.now_unix()) {
            return Err(RelayError::Expired);
        }
        if session.auth_subject != auth_subject {
            return Err(RelayError::Forbidden);
        }
        if session.purpose != expected {
            return Err(RelayError::InvalidPurpose);
        }
        Ok(session.clone())
    }

    pub fn revoke(&self, session_id: &str, auth_subject: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(session_id).ok_or(RelayError::NotFound)?;
        if session.auth_subject != auth_subject {
            return Err(RelayError::Forbidden);
        }
        session.revoked = true;
        debug!(purpose = %session.purpose, "session revoked");
        Ok(())
    }

    /// Drop revoked and expired sessions; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_unix();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.revoked && !s.is_expired(now));
        let removed = before - sessions.len();
        if removed > 0 {
            info!(removed, remaining = sessions.len(), "sessions cleaned up");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn authority() -> (ManualClock, SessionAuthority) {
        let clock = ManualClock::new(1_700_000_000);
        let auth = SessionAuthority::new(Duration::from_secs(900), Arc::new(clock.clone()));
        (clock, auth)
    }

    #[test]
    fn purpose_parses_wire_names() {
        assert_eq!("message_send".parse::<Purpose>().unwrap(), Purpose::MessageSend);
        assert_eq!(" message_receive ".parse::<Purpose>().unwrap(), Purpose::MessageReceive);
        assert!(matches!(
            "admin".parse::<Purpose>(),
            Err(RelayError::InvalidArgument(_))
        ));
        assert_eq!(
            serde_json::to_string(&Purpose::MessageReceive).unwrap(),
            "\"message_receive\""
        );
    }

    #[test]
    fn issue_sets_expiry_and_opaque_id() {
        let (_clock, auth) = authority();
        let s = auth.issue("u1", Purpose::MessageSend, Some("c1")).unwrap();
        assert!(s.session_id.starts_with("sess_"));
        assert_eq!(s.expires_at_unix, 1_700_000_000 + 900);
        assert_eq!(s.conversation_id.as_deref(), Some("c1"));
        assert!(!s.revoked);
        assert_eq!(auth.len(), 1);
    }

    #[test]
    fn issue_rejects_bad_input() {
        let (_clock, auth) = authority();
        assert!(matches!(
            auth.issue("", Purpose::MessageReceive, None),
            Err(RelayError::InvalidArgument(_))
        ));
        assert!(matches!(
            auth.issue("u1", Purpose::MessageSend, None),
            Err(RelayError::InvalidArgument(_))
        ));
        assert!(matches!(
            auth.issue("u1", Purpose::MessageSend, Some("  ")),
            Err(RelayError::InvalidArgument(_))
        ));
        let inbox = auth.issue("u1", Purpose::MessageReceive, None).unwrap();
        assert!(inbox.conversation_id.is_none());
    }

    #[test]
    fn validate_fails_in_order() {
        let (clock, auth) = authority();
        assert!(matches!(
            auth.validate("sess_nope", "u1", Purpose::MessageSend),
            Err(RelayError::NotFound)
        ));

        let s = auth.issue("u1", Purpose::MessageSend, Some("c1")).unwrap();
        assert!(matches!(
            auth.validate(&s.session_id, "u2", Purpose::MessageSend),
            Err(RelayError::Forbidden)
        ));
        assert!(matches!(
            auth.validate(&s.session_id, "u1", Purpose::MessageReceive),
            Err(RelayError::InvalidPurpose)
        ));
        assert_eq!(
            auth.validate(&s.session_id, "u1", Purpose::MessageSend).unwrap(),
            s
        );

        clock.advance(901);
        assert!(matches!(
            auth.validate(&s.session_id, "u2", Purpose::MessageReceive),
            Err(RelayError::Expired)
        ));
        auth.revoke(&s.session_id, "u1").unwrap();
        assert!(matches!(
            auth.validate(&s.session_id, "u2", Purpose::MessageReceive),
            Err(RelayError::Revoked)
        ));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let (clock, auth) = authority();
        let s = auth.issue("u1", Purpose::MessageReceive, None).unwrap();
        clock.set(s.expires_at_unix);
        assert!(auth.validate(&s.session_id, "u1", Purpose::MessageReceive).is_ok());
        clock.advance(1);
        assert!(matches!(
            auth.validate(&s.session_id, "u1", Purpose::MessageReceive),
            Err(RelayError::Expired)
        ));
    }

    #[test]
    fn revoke_checks_owner_and_is_terminal() {
        let (_clock, auth) = authority();
        let s = auth.issue("u1", Purpose::MessageReceive, None).unwrap();
        assert!(matches!(auth.revoke("sess_x", "u1"), Err(RelayError::NotFound)));
        assert!(matches!(auth.revoke(&s.session_id, "u2"), Err(RelayError::Forbidden)));
        auth.revoke(&s.session_id, "u1").unwrap();
        auth.revoke(&s.session_id, "u1").unwrap();
        assert!(matches!(
            auth.validate(&s.session_id, "u1", Purpose::MessageReceive),
            Err(RelayError::Revoked)
        ));
    }

    #[test]
    fn cleanup_drops_expired_and_revoked_only() {
        let (clock, auth) = authority();
        let revoked = auth.issue("u1", Purpose::MessageReceive, None).unwrap();
        auth.revoke(&revoked.session_id, "u1").unwrap();
        let _old = auth.issue("u1", Purpose::MessageSend, Some("c1")).unwrap();
        clock.advance(600);
        let fresh = auth.issue("u1", Purpose::MessageSend, Some("c1")).unwrap();
        clock.advance(400);

        assert_eq!(auth.cleanup(), 2);
        assert_eq!(auth.len(), 1);
        assert!(auth.validate(&fresh.session_id, "u1", Purpose::MessageSend).is_ok());
        assert_eq!(auth.cleanup(), 0);
    }

    #[test]
    fn send_session_does_not_cover_receive_or_other_scopes() {
        let (_clock, auth) = authority();
        let s = auth.issue("u1", Purpose::MessageSend, Some("X")).unwrap();
        assert!(matches!(
            auth.validate(&s.session_id, "u1", Purpose::MessageReceive),
            Err(RelayError::InvalidPurpose)
        ));
        let v = auth.validate(&s.session_id, "u1", Purpose::MessageSend).unwrap();
        assert!(v.covers(SessionScope::Conversation("X")));
        assert!(!v.covers(SessionScope::Conversation("Y")));
        assert!(!v.covers(SessionScope::Inbox));
    }

    #[test]
    fn inbox_session_never_covers_a_conversation() {
        let (_clock, auth) = authority();
        let s = auth.issue("u1", Purpose::MessageReceive, None).unwrap();
        assert!(s.covers(SessionScope::Inbox));
        for id in ["c1", "conv_abc", "X"] {
            assert!(!s.covers(SessionScope::Conversation(id)));
        }
        assert_eq!(SessionScope::from_conversation(Some("")), SessionScope::Inbox);
        assert_eq!(
            SessionScope::from_conversation(Some("c1")),
            SessionScope::Conversation("c1")
        );
    }

    #[test]
    fn concurrent_validation_and_cleanup() {
        let (_clock, auth) = authority();
        let auth = Arc::new(auth);
        let s = auth.issue("u1", Purpose::MessageReceive, None).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let auth = Arc::clone(&auth);
                let id = s.session_id.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if i % 2 == 0 {
                            auth.validate(&id, "u1", Purpose::MessageReceive).unwrap();
                        } else {
                            auth.cleanup();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(auth.len(), 1);
    }
}
