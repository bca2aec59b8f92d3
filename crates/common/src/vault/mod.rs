//! At-rest credential vault
//!
//! [`CredentialVault`] seals serializable credentials into a versioned
//! [`EncryptedBlob`] and hands the armored result to a pluggable
//! [`VaultStore`]. The primary scheme is AES-256-GCM under a key derived
//! from the machine's [`DeviceFingerprint`] via a slow salted KDF; when key
//! derivation is unavailable the vault can fall back to reversible
//! obfuscation, marked as such in the blob version so readers never mistake
//! it for real encryption.
//!
//! Opening is fail-closed: a blob that is malformed, tampered with, sealed
//! under an unknown version, or sealed on another machine reads back as "no
//! credentials present" rather than an error. Callers re-authenticate; they
//! never crash on a bad blob.

pub mod blob;
pub mod keys;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::password_hash::rand_core::{OsRng, RngCore};
use argon2::password_hash::SaltString;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

pub use blob::{EncryptedBlob, BLOB_VERSION_AEAD, BLOB_VERSION_OBFUSCATED, NONCE_LEN, TAG_LEN};
pub use keys::{derive_key, DeviceFingerprint, WrappedKey, KEY_LEN};

/// Errors surfaced by vault operations.
///
/// Note that failure to *open* a stored blob is not an error: the vault
/// reports those as absent credentials.
#[derive(Debug, Clone, Error)]
pub enum VaultError {
    /// The backing store could not be read or written.
    #[error("Vault storage failed: {0}")]
    Storage(String),

    /// Sealing failed (cipher setup or encryption).
    #[error("Vault crypto operation failed: {0}")]
    Crypto(String),

    /// The payload or blob envelope could not be (de)serialized.
    #[error("Vault serialization failed: {0}")]
    Serialization(String),

    /// The KDF could not derive a sealing key.
    #[error("Vault key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Vault behavior knobs.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Store key under which the single credential blob lives
    pub storage_key: String,
    /// Fall back to obfuscation when key derivation fails
    pub allow_obfuscation_fallback: bool,
    /// Skip AEAD entirely and always use the obfuscation scheme
    pub force_obfuscation: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_key: "credentials.v1".to_string(),
            allow_obfuscation_fallback: true,
            force_obfuscation: false,
        }
    }
}

impl VaultConfig {
    /// Config storing the blob under `storage_key`.
    pub fn with_storage_key(storage_key: impl Into<String>) -> Self {
        Self { storage_key: storage_key.into(), ..Self::default() }
    }
}

/// String-valued key/value persistence behind the vault.
///
/// Implementations hold armored blobs only; plaintext never reaches them.
pub trait VaultStore: Send + Sync {
    /// Fetch the value for `key`, `None` when absent.
    fn get(&self, key: &str) -> Result<Option<String>, VaultError>;
    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &str) -> Result<(), VaultError>;
    /// Remove `key`; absent keys are not an error.
    fn remove(&self, key: &str) -> Result<(), VaultError>;
}

/// In-process store for tests and short-lived tools.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl VaultStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), VaultError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), VaultError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// One-file-per-key store rooted at a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store rooted at `dir`; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.vault"))
    }
}

impl VaultStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, VaultError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(VaultError::Storage(err.to_string())),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), VaultError> {
        fs::create_dir_all(&self.dir).map_err(|e| VaultError::Storage(e.to_string()))?;
        let path = self.path_for(key);
        fs::write(&path, value).map_err(|e| VaultError::Storage(e.to_string()))?;

        // Owner-only on platforms that support it.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
                .map_err(|e| VaultError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), VaultError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(VaultError::Storage(err.to_string())),
        }
    }
}

struct CachedKey {
    salt: String,
    key: WrappedKey,
}

/// Seals credentials at rest and opens them fail-closed.
pub struct CredentialVault {
    backend: Arc<dyn VaultStore>,
    fingerprint: DeviceFingerprint,
    config: VaultConfig,
    cached_key: RwLock<Option<CachedKey>>,
}

impl CredentialVault {
    /// Vault over `backend` using this machine's fingerprint.
    pub fn new(backend: Arc<dyn VaultStore>, config: VaultConfig) -> Self {
        Self::with_fingerprint(backend, config, DeviceFingerprint::collect())
    }

    /// Vault with an explicit fingerprint (tests and embedders).
    pub fn with_fingerprint(
        backend: Arc<dyn VaultStore>,
        config: VaultConfig,
        fingerprint: DeviceFingerprint,
    ) -> Self {
        Self { backend, fingerprint, config, cached_key: RwLock::new(None) }
    }

    /// Seal `credentials` and persist the armored blob.
    ///
    /// # Errors
    ///
    /// [`VaultError`] when serialization, sealing, or the backing store
    /// fails. Key-derivation failure falls back to obfuscation instead when
    /// the config allows it.
    pub fn store<T: Serialize>(&self, credentials: &T) -> Result<(), VaultError> {
        let plaintext = serde_json::to_vec(credentials)
            .map_err(|e| VaultError::Serialization(e.to_string()))?;
        let blob = self.seal(&plaintext)?;
        let armored = blob.encode()?;
        self.backend.put(&self.config.storage_key, &armored)?;
        debug!(aead = blob.is_aead(), "credentials sealed and stored");
        Ok(())
    }

    /// Open and deserialize the stored credentials.
    ///
    /// Returns `Ok(None)` when nothing is stored, and also when the stored
    /// blob is malformed, tampered with, of an unknown version, or sealed on
    /// a different machine. Callers treat `None` as "authenticate again".
    ///
    /// # Errors
    ///
    /// [`VaultError::Storage`] only, when the backing store cannot be read.
    pub fn retrieve<T: DeserializeOwned>(&self) -> Result<Option<T>, VaultError> {
        let Some(armored) = self.backend.get(&self.config.storage_key)? else {
            return Ok(None);
        };

        let blob = match EncryptedBlob::decode(&armored) {
            Ok(blob) => blob,
            Err(err) => {
                warn!(error = %err, "stored credential blob is malformed; treating as absent");
                return Ok(None);
            }
        };

        let Some(plaintext) = self.open(&blob) else {
            warn!(
                version = blob.version,
                "stored credential blob failed to open; treating as absent"
            );
            return Ok(None);
        };

        match serde_json::from_slice(&plaintext) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(err) => {
                warn!(error = %err, "sealed payload does not deserialize; treating as absent");
                Ok(None)
            }
        }
    }

    /// Remove the stored blob and drop the cached sealing key.
    pub fn clear(&self) -> Result<(), VaultError> {
        self.backend.remove(&self.config.storage_key)?;
        *self.cached_key.write() = None;
        debug!("credentials cleared from vault");
        Ok(())
    }

    fn seal(&self, plaintext: &[u8]) -> Result<EncryptedBlob, VaultError> {
        if self.config.force_obfuscation {
            return Ok(self.obfuscate(plaintext));
        }
        match self.sealing_key(None) {
            Ok((salt, key)) => self.seal_aead(plaintext, salt, &key),
            Err(err) if self.config.allow_obfuscation_fallback => {
                warn!(error = %err, "key derivation unavailable; falling back to obfuscation");
                Ok(self.obfuscate(plaintext))
            }
            Err(err) => Err(err),
        }
    }

    fn seal_aead(
        &self,
        plaintext: &[u8],
        salt: String,
        key: &Zeroizing<[u8; KEY_LEN]>,
    ) -> Result<EncryptedBlob, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        let sealed = cipher
            .encrypt(&Nonce::from(nonce_bytes), plaintext)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;

        // AES-GCM appends the tag; the blob stores it separately.
        let tag_start = sealed.len().saturating_sub(TAG_LEN);
        Ok(EncryptedBlob {
            version: BLOB_VERSION_AEAD,
            salt,
            nonce: nonce_bytes.to_vec(),
            ciphertext: sealed[..tag_start].to_vec(),
            tag: sealed[tag_start..].to_vec(),
        })
    }

    fn open(&self, blob: &EncryptedBlob) -> Option<Vec<u8>> {
        match blob.version {
            BLOB_VERSION_AEAD => self.open_aead(blob),
            BLOB_VERSION_OBFUSCATED => self.deobfuscate(blob),
            other => {
                warn!(version = other, "unknown blob version");
                None
            }
        }
    }

    fn open_aead(&self, blob: &EncryptedBlob) -> Option<Vec<u8>> {
        if blob.nonce.len() != NONCE_LEN || blob.tag.len() != TAG_LEN {
            return None;
        }
        let (_, key) = self.sealing_key(Some(&blob.salt)).ok()?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice()).ok()?;

        let mut sealed = blob.ciphertext.clone();
        sealed.extend_from_slice(&blob.tag);
        cipher.decrypt(Nonce::from_slice(&blob.nonce), sealed.as_slice()).ok()
    }

    fn obfuscate(&self, plaintext: &[u8]) -> EncryptedBlob {
        let mut salt_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = hex::encode(salt_bytes);

        let stream = keys::obfuscation_keystream(&self.fingerprint, &salt, plaintext.len());
        let ciphertext: Vec<u8> = plaintext.iter().zip(&stream).map(|(p, k)| p ^ k).collect();
        let tag = keys::obfuscation_tag(&self.fingerprint, &salt, &ciphertext);

        EncryptedBlob {
            version: BLOB_VERSION_OBFUSCATED,
            salt,
            nonce: Vec::new(),
            ciphertext,
            tag,
        }
    }

    fn deobfuscate(&self, blob: &EncryptedBlob) -> Option<Vec<u8>> {
        let expected = keys::obfuscation_tag(&self.fingerprint, &blob.salt, &blob.ciphertext);
        if expected != blob.tag {
            return None;
        }
        let stream =
            keys::obfuscation_keystream(&self.fingerprint, &blob.salt, blob.ciphertext.len());
        Some(blob.ciphertext.iter().zip(&stream).map(|(c, k)| c ^ k).collect())
    }

    /// Sealing key for the given salt, from cache when possible. With no
    /// salt requested, reuses the cached salt or generates a fresh one.
    fn sealing_key(
        &self,
        salt: Option<&str>,
    ) -> Result<(String, Zeroizing<[u8; KEY_LEN]>), VaultError> {
        {
            let cache = self.cached_key.read();
            if let Some(cached) = cache.as_ref() {
                if salt.is_none() || salt == Some(cached.salt.as_str()) {
                    return Ok((cached.salt.clone(), cached.key.unwrap_key()));
                }
            }
        }

        let salt_string = match salt {
            Some(s) => SaltString::from_b64(s)
                .map_err(|e| VaultError::KeyDerivation(format!("invalid salt: {e}")))?,
            None => SaltString::generate(&mut OsRng),
        };
        let key = keys::derive_key(&self.fingerprint, &salt_string)?;

        let mut cache = self.cached_key.write();
        *cache = Some(CachedKey {
            salt: salt_string.as_str().to_string(),
            key: WrappedKey::wrap(&key),
        });
        Ok((salt_string.as_str().to_string(), key))
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("storage_key", &self.config.storage_key)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}
