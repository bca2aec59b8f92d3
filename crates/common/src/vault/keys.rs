//! Key material for the credential vault
//!
//! The vault never asks the user for a passphrase. Instead a
//! [`DeviceFingerprint`] built from stable local machine identifiers feeds a
//! deliberately slow salted KDF (Argon2id) to produce the sealing key, so a
//! blob lifted off one machine does not open on another without also
//! reproducing that machine's identifiers.
//!
//! Derived keys are expensive, so the vault caches one per salt. The cached
//! copy lives inside a [`WrappedKey`]: XOR-masked with a random pad so the
//! raw key bytes are never resident between uses, and zeroed on drop.

use std::fmt;

use argon2::password_hash::rand_core::{OsRng, RngCore};
use argon2::password_hash::SaltString;
use argon2::Argon2;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::VaultError;

/// Sealing key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// Stable identifier material for the current machine.
///
/// Combines host name, account name, OS and architecture, then hashes the
/// combination so the stored material has a fixed shape and no identifier
/// appears verbatim in memory dumps or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    material: String,
}

impl DeviceFingerprint {
    /// Fingerprint from the identifiers of the machine we are running on.
    ///
    /// Missing identifiers fall back to fixed placeholders rather than
    /// failing; the KDF salt still individualizes the derived key.
    pub fn collect() -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown-host".to_string());
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".to_string());
        Self::from_parts(&[&host, &user, std::env::consts::OS, std::env::consts::ARCH])
    }

    /// Fingerprint from explicit identifier parts (tests and embedders that
    /// have better identifiers than environment variables).
    pub fn from_parts(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        Self { material: hex::encode(hasher.finalize()) }
    }

    /// KDF input bytes.
    pub(crate) fn material(&self) -> &[u8] {
        self.material.as_bytes()
    }
}

impl fmt::Debug for DeviceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceFingerprint([REDACTED])")
    }
}

/// Derive a sealing key from the fingerprint and a per-blob salt.
///
/// Argon2id with default parameters: slow on purpose, so brute-forcing
/// candidate fingerprints against a stolen blob stays expensive.
///
/// # Errors
///
/// [`VaultError::KeyDerivation`] when the KDF rejects its inputs.
pub fn derive_key(
    fingerprint: &DeviceFingerprint,
    salt: &SaltString,
) -> Result<Zeroizing<[u8; KEY_LEN]>, VaultError> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    Argon2::default()
        .hash_password_into(fingerprint.material(), salt.as_str().as_bytes(), key.as_mut())
        .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// A derived key held in cache, XOR-masked with a one-time random pad.
///
/// Neither half is useful alone; [`unwrap_key`](Self::unwrap_key)
/// reconstitutes the key into a zero-on-drop buffer for immediate use.
pub struct WrappedKey {
    masked: Zeroizing<[u8; KEY_LEN]>,
    mask: Zeroizing<[u8; KEY_LEN]>,
}

impl WrappedKey {
    /// Mask `key` with a fresh random pad.
    pub fn wrap(key: &[u8; KEY_LEN]) -> Self {
        let mut mask = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(mask.as_mut());

        let mut masked = Zeroizing::new([0u8; KEY_LEN]);
        for (i, byte) in key.iter().enumerate() {
            masked[i] = byte ^ mask[i];
        }
        Self { masked, mask }
    }

    /// Reconstitute the key for immediate use.
    pub fn unwrap_key(&self) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        for i in 0..KEY_LEN {
            key[i] = self.masked[i] ^ self.mask[i];
        }
        key
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrappedKey([REDACTED])")
    }
}

/// Keystream for the obfuscation fallback: counter-mode SHA-256 over the
/// fingerprint material and salt. Reversible by construction; callers must
/// treat it as obfuscation, never as encryption.
pub(crate) fn obfuscation_keystream(
    fingerprint: &DeviceFingerprint,
    salt: &str,
    len: usize,
) -> Vec<u8> {
    let mut stream = Vec::with_capacity(len);
    let mut counter = 0u32;
    while stream.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.material());
        hasher.update(salt.as_bytes());
        hasher.update(counter.to_le_bytes());
        stream.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    stream.truncate(len);
    stream
}

/// Integrity tag for the obfuscation fallback. Detects accidental
/// corruption only; anyone who can forge the payload can forge this too.
pub(crate) fn obfuscation_tag(
    fingerprint: &DeviceFingerprint,
    salt: &str,
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.material());
    hasher.update(salt.as_bytes());
    hasher.update(ciphertext);
    hasher.finalize()[..super::blob::TAG_LEN].to_vec()
}
