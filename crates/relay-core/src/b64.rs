//! Serde adapters that encode byte fields as standard base64 strings, the
//! layout existing logs and envelopes already use. `null` decodes as empty.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    match encoded {
        None => Ok(Vec::new()),
        Some(s) => general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom),
    }
}

/// Same encoding, but an empty blob is written as `null`.
pub mod nullable {
    use base64::{engine::general_purpose, Engine as _};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if bytes.is_empty() {
            serializer.serialize_none()
        } else {
            serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
        }
    }

    pub use super::deserialize;
}
