//! Versioned on-disk format for sealed credential payloads
//!
//! Every sealed payload round-trips through [`EncryptedBlob`]: a small
//! versioned envelope carrying the KDF salt, AEAD nonce, ciphertext and
//! authentication tag. The envelope serializes to JSON and is then
//! base64-armored so any string-valued store can hold it.
//!
//! Decoding is fail-closed: anything that does not parse back into a
//! well-formed envelope is reported as an error, which the vault treats as
//! "no credentials present".

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::VaultError;

/// Version marker for payloads sealed by the reversible obfuscation
/// fallback (no real confidentiality).
pub const BLOB_VERSION_OBFUSCATED: u8 = 0;

/// Version marker for payloads sealed with AES-256-GCM under a derived key.
pub const BLOB_VERSION_AEAD: u8 = 1;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Sealed payload envelope as persisted by the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// Sealing scheme marker; unknown values are rejected on open
    pub version: u8,
    /// KDF salt, in the salt-string encoding it was generated with
    pub salt: String,
    /// Per-seal random nonce
    pub nonce: Vec<u8>,
    /// Sealed payload bytes, without the trailing tag
    pub ciphertext: Vec<u8>,
    /// Integrity tag over the payload
    pub tag: Vec<u8>,
}

impl EncryptedBlob {
    /// True when sealed with the AEAD scheme rather than the fallback.
    pub fn is_aead(&self) -> bool {
        self.version == BLOB_VERSION_AEAD
    }

    /// Serialize to the base64-armored string persisted by the store.
    pub fn encode(&self) -> Result<String, VaultError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;
        Ok(BASE64.encode(json))
    }

    /// Parse a persisted string back into an envelope.
    ///
    /// # Errors
    ///
    /// [`VaultError::Serialization`] when the armor or the JSON inside it is
    /// malformed.
    pub fn decode(encoded: &str) -> Result<Self, VaultError> {
        let json = BASE64
            .decode(encoded.trim())
            .map_err(|e| VaultError::Serialization(format!("invalid base64 armor: {e}")))?;
        serde_json::from_slice(&json)
            .map_err(|e| VaultError::Serialization(format!("malformed blob envelope: {e}")))
    }
}
