//! relay-core: ciphertext-only message relay for mixnet-backed clients
//!
//! Nothing in this crate ever writes plaintext to disk. Messages are sealed
//! in memory by the [`orchestrator`], persisted as opaque envelopes by the
//! [`ledger`], and handed to an abstract [`transport`].
//!
//! # Module layout
//! - `store`: append-only JSONL log + atomically replaced JSON index
//! - `conversations`: peer fingerprint → stable conversation identity
//! - `ledger`: per-owner, per-conversation message availability
//! - `sessions`: short-lived, purpose-scoped authorisation tickets
//! - `orchestrator`: seal, size-check, persist, hand off to transport
//! - `transport`: send/receive capability trait, mock + mixnet adapter
//! - `relay`: the logical operation surface with scope checks
//! - `envelope`: versioned wire container
//! - `crypto`: transient placeholder sealing, fingerprints, ids
//! - `config`, `clock`, `paths`, `error`

pub mod clock;
pub mod config;
pub mod conversations;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod paths;
pub mod relay;
pub mod sessions;
pub mod store;
pub mod transport;

mod b64;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use relay::Relay;
