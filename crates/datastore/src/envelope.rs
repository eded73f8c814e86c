//! Compact authenticated-encryption envelope.
//!
//! Everything the datastore persists in encrypted form — the key
//! bundle and every record — is one line of text with five
//! dot-separated base64url segments:
//!
//! ```text
//! protected-header . <empty> . iv . ciphertext . tag
//! ```
//!
//! The protected header is the JSON `{"alg":"dir","enc":"XC20P"}`
//! (direct key agreement, so the second segment is always empty) and
//! its encoded form doubles as the associated data, binding the header
//! to the ciphertext. Changing this serialization breaks compatibility
//! with existing databases.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use serde::Deserialize;

use crate::crypto::KeyMaterial;
use crate::error::{Error, Result};

const PROTECTED_HEADER: &str = r#"{"alg":"dir","enc":"XC20P"}"#;
const NONCE_SIZE: usize = 24;
const TAG_SIZE: usize = 16;

#[derive(Deserialize)]
struct Header {
    alg: String,
    enc: String,
}

/// Encrypts `plaintext` under `key` and returns the envelope text.
///
/// # Errors
/// Returns `CRYPTO` if encryption fails.
pub fn seal(key: &KeyMaterial, plaintext: &[u8]) -> Result<String> {
    let protected = URL_SAFE_NO_PAD.encode(PROTECTED_HEADER.as_bytes());

    let mut nonce = [0u8; NONCE_SIZE];
    getrandom::fill(&mut nonce).map_err(|e| Error::crypto(format!("nonce generation: {e}")))?;

    let aead = XChaCha20Poly1305::new(key.as_bytes().into());
    let sealed = aead
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: protected.as_bytes(),
            },
        )
        .map_err(|_| Error::crypto("envelope seal failed"))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

    Ok(format!(
        "{}..{}.{}.{}",
        protected,
        URL_SAFE_NO_PAD.encode(nonce),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(tag),
    ))
}

/// Authenticates and decrypts an envelope produced by [`seal`].
///
/// # Errors
/// Returns `CRYPTO` on any failure: malformed segments, an unexpected
/// header, or an authentication-tag mismatch (tampering, wrong key).
pub fn open(key: &KeyMaterial, envelope: &str) -> Result<Vec<u8>> {
    let segments: Vec<&str> = envelope.split('.').collect();
    let [protected, encrypted_key, iv, ciphertext, tag] = segments.as_slice() else {
        return Err(Error::crypto("malformed envelope"));
    };
    if !encrypted_key.is_empty() {
        return Err(Error::crypto("malformed envelope"));
    }

    let header_bytes = decode_segment(protected)?;
    let header: Header = serde_json::from_slice(&header_bytes)
        .map_err(|_| Error::crypto("malformed envelope header"))?;
    if header.alg != "dir" || header.enc != "XC20P" {
        return Err(Error::crypto("unsupported envelope algorithm"));
    }

    let nonce = decode_segment(iv)?;
    if nonce.len() != NONCE_SIZE {
        return Err(Error::crypto("malformed envelope"));
    }
    let tag = decode_segment(tag)?;
    if tag.len() != TAG_SIZE {
        return Err(Error::crypto("malformed envelope"));
    }
    let mut sealed = decode_segment(ciphertext)?;
    sealed.extend_from_slice(&tag);

    let aead = XChaCha20Poly1305::new(key.as_bytes().into());
    aead.decrypt(
        XNonce::from_slice(&nonce),
        Payload {
            msg: &sealed,
            // the AAD is the protected segment exactly as received
            aad: protected.as_bytes(),
        },
    )
    .map_err(|_| Error::crypto("envelope authentication failed"))
}

fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| Error::crypto("malformed envelope"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::error::Reason;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = KeyMaterial::random();
        let envelope = seal(&key, b"secret payload").unwrap();
        assert_eq!(open(&key, &envelope).unwrap(), b"secret payload");
    }

    #[test]
    fn test_envelope_has_five_segments_with_empty_second() {
        let key = KeyMaterial::random();
        let envelope = seal(&key, b"x").unwrap();
        let segments: Vec<&str> = envelope.split('.').collect();
        assert_eq!(segments.len(), 5);
        assert!(segments[1].is_empty());
        assert_eq!(
            URL_SAFE_NO_PAD.decode(segments[0]).unwrap(),
            PROTECTED_HEADER.as_bytes()
        );
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let envelope = seal(&KeyMaterial::random(), b"payload").unwrap();
        let err = open(&KeyMaterial::random(), &envelope).unwrap_err();
        assert_eq!(err.reason(), Some(Reason::Crypto));
    }

    #[test]
    fn test_tampered_ciphertext_is_detected() {
        let key = KeyMaterial::random();
        let envelope = seal(&key, b"payload").unwrap();

        let mut segments: Vec<String> = envelope.split('.').map(String::from).collect();
        let mut ct = URL_SAFE_NO_PAD.decode(&segments[3]).unwrap();
        ct[0] ^= 0x01;
        segments[3] = URL_SAFE_NO_PAD.encode(ct);

        let err = open(&key, &segments.join(".")).unwrap_err();
        assert_eq!(err.reason(), Some(Reason::Crypto));
    }

    #[test]
    fn test_tampered_header_is_detected() {
        let key = KeyMaterial::random();
        let envelope = seal(&key, b"payload").unwrap();

        // a different-but-valid header fails authentication via the AAD
        let mut segments: Vec<String> = envelope.split('.').map(String::from).collect();
        segments[0] = URL_SAFE_NO_PAD.encode(r#"{"enc":"XC20P","alg":"dir"}"#);
        let err = open(&key, &segments.join(".")).unwrap_err();
        assert_eq!(err.reason(), Some(Reason::Crypto));
    }

    #[test]
    fn test_malformed_envelopes_are_rejected() {
        let key = KeyMaterial::random();
        for bad in ["", "a.b.c", "a.b.c.d.e.f", "not an envelope at all"] {
            let err = open(&key, bad).unwrap_err();
            assert_eq!(err.reason(), Some(Reason::Crypto), "input: {bad:?}");
        }

        // non-empty second segment
        let envelope = seal(&key, b"x").unwrap();
        let mut segments: Vec<String> = envelope.split('.').map(String::from).collect();
        segments[1] = URL_SAFE_NO_PAD.encode(b"cek");
        let err = open(&key, &segments.join(".")).unwrap_err();
        assert_eq!(err.reason(), Some(Reason::Crypto));
    }
}
