use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Key size of the suite, in bytes (XChaCha20-Poly1305, Argon2id output).
pub const KEY_SIZE: usize = 32;

/// Size of a generated per-database salt, in bytes.
pub const SALT_SIZE: usize = 16;

// Argon2id costs for passphrase-derived application keys (~19MB memory).
const M_COST_KIB: u32 = 19_456;
const T_COST: u32 = 3;
const P_COST: u32 = 1;

/// A 32-byte symmetric key. Zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(pub(crate) [u8; KEY_SIZE]);

impl KeyMaterial {
    /// Generates a key from the system's cryptographically secure
    /// random source.
    ///
    /// # Panics
    /// Panics if the system cannot produce random bytes.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn random() -> Self {
        let mut k = [0u8; KEY_SIZE];
        getrandom::fill(&mut k).expect("Failed to get random bytes");
        Self(k)
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// Key bytes never appear in logs or panic messages.
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// The application key: the outermost symmetric key protecting the
/// key bundle. Ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppKey(KeyMaterial);

impl AppKey {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(KeyMaterial::from_bytes(bytes))
    }

    /// Parses raw key material from its base64url (unpadded) text form.
    ///
    /// # Errors
    /// Returns `INVALID` if the text does not decode to exactly 32
    /// bytes.
    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(text)
            .map_err(|_| Error::invalid("application key is not valid base64url"))?;
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::invalid("application key must decode to 32 bytes"))?;
        Ok(Self::from_bytes(bytes))
    }

    /// The fixed default key used when a datastore is opened with no
    /// key source at all.
    ///
    /// Insecure by construction: it offers no protection beyond
    /// obscuring the bytes at rest, and is intended only for
    /// unconfigured instances.
    #[must_use]
    pub const fn zero() -> Self {
        Self::from_bytes([0u8; KEY_SIZE])
    }

    /// Derives an application key from a passphrase and a per-database
    /// salt with Argon2id.
    ///
    /// # Errors
    /// Returns `CRYPTO` if the derivation fails.
    pub fn derive(passphrase: &str, salt: &[u8]) -> Result<Self> {
        let params = Params::new(M_COST_KIB, T_COST, P_COST, Some(KEY_SIZE))
            .map_err(|e| Error::crypto(format!("key derivation parameters: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut out = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut out)
            .map_err(|e| Error::crypto(format!("key derivation failed: {e}")))?;
        Ok(Self::from_bytes(out))
    }

    pub(crate) fn material(&self) -> &KeyMaterial {
        &self.0
    }
}

/// The inner symmetric keys of an initialized database: one for record
/// encryption, one for key wrapping. Generated once and preserved
/// verbatim across rebases so record ciphertexts stay addressable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    records: KeyMaterial,
    wrapping: KeyMaterial,
}

#[derive(Serialize, Deserialize)]
struct KeyBundleWire {
    records: String,
    wrapping: String,
}

impl KeyBundle {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            records: KeyMaterial::random(),
            wrapping: KeyMaterial::random(),
        }
    }

    /// The record-encryption key.
    pub(crate) fn records(&self) -> &KeyMaterial {
        &self.records
    }

    /// Serializes the bundle to the JSON form that gets wrapped under
    /// the application key.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = KeyBundleWire {
            records: URL_SAFE_NO_PAD.encode(self.records.as_bytes()),
            wrapping: URL_SAFE_NO_PAD.encode(self.wrapping.as_bytes()),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Parses a bundle from its serialized JSON form.
    ///
    /// # Errors
    /// Returns `CRYPTO` if the payload is not a well-formed bundle.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let wire: KeyBundleWire = serde_json::from_slice(bytes)
            .map_err(|_| Error::crypto("malformed key bundle"))?;
        Ok(Self {
            records: decode_key(&wire.records)?,
            wrapping: decode_key(&wire.wrapping)?,
        })
    }
}

fn decode_key(text: &str) -> Result<KeyMaterial> {
    let bytes = URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| Error::crypto("malformed key bundle"))?;
    let bytes: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| Error::crypto("malformed key bundle"))?;
    Ok(KeyMaterial::from_bytes(bytes))
}

/// Generates a fresh per-database salt.
///
/// # Panics
/// Panics if the system cannot produce random bytes.
#[allow(clippy::expect_used)]
#[must_use]
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_SIZE];
    getrandom::fill(&mut salt).expect("Failed to get random bytes");
    salt
}

/// Encodes a salt to the textual form persisted in the backing store.
#[must_use]
pub fn encode_salt(salt: &[u8]) -> Vec<u8> {
    URL_SAFE_NO_PAD.encode(salt).into_bytes()
}

/// Decodes a persisted salt.
///
/// # Errors
/// Returns `CRYPTO` if the stored bytes are not valid base64url.
pub fn decode_salt(stored: &[u8]) -> Result<Vec<u8>> {
    let text =
        std::str::from_utf8(stored).map_err(|_| Error::crypto("malformed persisted salt"))?;
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| Error::crypto("malformed persisted salt"))
}
