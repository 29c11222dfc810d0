//! Integration tests for the service wiring.
//!
//! Tests cover:
//!  1. Cleanup loop removes dead sessions and stops on request
//!  2. Config layering with a data-dir override
//!  3. Reindex on start and the offline reindex helper
//!  4. Inbound bytes through a started relay

use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use relay_core::clock::{Clock, ManualClock};
use relay_core::envelope::Envelope;
use relay_core::sessions::{Purpose, SessionAuthority};
use relay_core::transport::MockTransport;
use relay_service::{load_config, open_relay, reindex_stores, spawn_cleanup_loop};

// ─── Test 1: Cleanup loop ───────────────────────────────────────────────────

#[tokio::test]
async fn test_cleanup_loop_removes_expired_sessions() {
    let clock = ManualClock::new(1_700_000_000);
    let sessions = Arc::new(SessionAuthority::new(
        Duration::from_secs(60),
        Arc::new(clock.clone()) as Arc<dyn Clock>,
    ));
    sessions.issue("u1", Purpose::MessageReceive, None).unwrap();
    sessions.issue("u2", Purpose::MessageReceive, None).unwrap();
    let revoked = sessions.issue("u3", Purpose::MessageSend, Some("c1")).unwrap();
    sessions.revoke(&revoked.session_id, "u3").unwrap();

    let (task, handle) = spawn_cleanup_loop(sessions.clone(), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(sessions.len(), 2);

    clock.advance(61);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(sessions.is_empty());

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("loop should stop after shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_cleanup_loop_stops_when_handle_dropped() {
    let sessions = Arc::new(SessionAuthority::new(
        Duration::from_secs(60),
        relay_core::clock::system(),
    ));
    let (task, handle) = spawn_cleanup_loop(sessions, Duration::from_secs(3600));
    drop(handle);
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("loop should stop once the sender is gone")
        .unwrap();
}

// ─── Test 2: Config layering ────────────────────────────────────────────────

#[test]
fn test_load_config_applies_file_then_data_dir_override() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("relay.json");
    fs::write(
        &path,
        r#"{"storage_dir": "/nonexistent/relay", "max_envelope_bytes": 2048}"#,
    )
    .unwrap();

    let config = load_config(Some(path.as_path()), Some(dir.path().join("data"))).unwrap();
    assert_eq!(config.storage_dir, dir.path().join("data"));
    assert_eq!(config.max_envelope_bytes, 2048);

    fs::write(&path, r#"{"session_ttl_secs": 0}"#).unwrap();
    assert!(load_config(Some(path.as_path()), Some(dir.path().join("data"))).is_err());
}

// ─── Test 3: Reindex ────────────────────────────────────────────────────────

#[test]
fn test_reindex_restores_lost_indexes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("relay.json");
    let mut config = load_config(Some(path.as_path()), Some(dir.path().join("data"))).unwrap();

    let relay = open_relay(&config, Arc::new(MockTransport::default())).unwrap();
    relay.start().unwrap();
    let conv = relay.create_conversation("u1", "fp1", None).unwrap();
    let send = relay
        .issue_session("u1", "message_send", Some(conv.conversation_id.as_str()))
        .unwrap();
    relay
        .send(&send.session_id, "u1", &conv.conversation_id, "hi")
        .unwrap();
    relay.stop().unwrap();

    fs::write(config.messages_dir().join("messages.index.json"), b"{}").unwrap();
    let summary = reindex_stores(&config, Arc::new(MockTransport::default())).unwrap();
    assert_eq!(summary.conversations.records, 1);
    assert_eq!(summary.messages.records, 1);
    assert_eq!(summary.messages.skipped, 0);

    fs::write(config.messages_dir().join("messages.index.json"), b"{}").unwrap();
    config.reindex_on_start = true;
    let reopened = open_relay(&config, Arc::new(MockTransport::default())).unwrap();
    let recv = reopened
        .issue_session("u1", "message_receive", None)
        .unwrap();
    assert_eq!(reopened.inbox(&recv.session_id, "u1", 10).unwrap().len(), 1);
}

// ─── Test 4: Inbound bytes ──────────────────────────────────────────────────

#[test]
fn test_inbound_envelope_through_started_relay() {
    let dir = tempdir().unwrap();
    let config = load_config(
        Some(dir.path().join("relay.json").as_path()),
        Some(dir.path().join("data")),
    )
    .unwrap();
    let transport = Arc::new(MockTransport::new(config.max_envelope_bytes));
    let relay = open_relay(&config, transport.clone()).unwrap();
    let conv = relay.create_conversation("owner", "fp-peer", None).unwrap();

    let raw = Envelope::new(conv.conversation_id.clone(), vec![5; 16], 1_700_000_000)
        .encode()
        .unwrap();
    assert!(transport.inject(&raw).is_err());
    relay.start().unwrap();
    transport.inject(&raw).unwrap();

    let recv = relay
        .issue_session("owner", "message_receive", Some(conv.conversation_id.as_str()))
        .unwrap();
    let items = relay
        .thread(&recv.session_id, "owner", &conv.conversation_id, 10, Some(false))
        .unwrap();
    assert_eq!(items.len(), 1);
}
