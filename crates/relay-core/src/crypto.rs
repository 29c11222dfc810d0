//! Transient sealing, fingerprints and opaque identifiers.
//!
//! The sealing key is a placeholder: random per process, never persisted and
//! never shared with peers. It keeps plaintext off disk; it is not an
//! end-to-end channel.
//!
//! Sealed wire format:
//!   [ nonce (24 bytes) | ciphertext + tag ]

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

use crate::error::{RelayError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

pub struct TransientKey(Zeroizing<[u8; KEY_LEN]>);

impl TransientKey {
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(key.as_mut());
        Self(key)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.0.as_ref()))
    }
}

impl fmt::Debug for TransientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TransientKey(<redacted>)")
    }
}

pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn seal(key: &TransientKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = generate_nonce();
    let ciphertext = key
        .cipher()
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| RelayError::Crypto(format!("seal: {e}")))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn open(key: &TransientKey, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < NONCE_LEN {
        return Err(RelayError::Crypto("sealed payload too short".into()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let plaintext = key
        .cipher()
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|e| RelayError::Crypto(format!("open: {e}")))?;
    Ok(Zeroizing::new(plaintext))
}

/// Lowercase hex SHA-256, used as the envelope fingerprint.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// `<prefix>_<32 hex chars>` from 16 random bytes.
pub fn opaque_id(prefix: &str) -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("{}_{}", prefix, hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip_uses_fresh_nonces() {
        let key = TransientKey::generate();
        let a = seal(&key, b"hello").unwrap();
        let b = seal(&key, b"hello").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), NONCE_LEN + 5 + 16);
        assert_eq!(open(&key, &a).unwrap().as_slice(), b"hello");
    }

    #[test]
    fn open_with_other_key_fails() {
        let sealed = seal(&TransientKey::generate(), b"secret").unwrap();
        let err = open(&TransientKey::generate(), &sealed).unwrap_err();
        assert!(matches!(err, RelayError::Crypto(_)));
        assert!(open(&TransientKey::generate(), b"short").is_err());
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn opaque_ids_are_prefixed_and_unique() {
        let a = opaque_id("sess");
        let b = opaque_id("sess");
        assert!(a.starts_with("sess_"));
        assert_eq!(a.len(), "sess_".len() + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn debug_never_prints_key_bytes() {
        let key = TransientKey::generate();
        assert_eq!(format!("{key:?}"), "TransientKey(<redacted>)");
    }
}
