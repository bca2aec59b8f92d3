//! Integration tests for the credential vault
//!
//! Exercises the full seal/open lifecycle against the file-backed store,
//! including machine binding and the obfuscation fallback.

#![cfg(feature = "runtime")]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use adbridge_common::auth::TokenSet;
use adbridge_common::vault::{
    CredentialVault, DeviceFingerprint, EncryptedBlob, FileStore, MemoryStore, VaultConfig,
    VaultStore, BLOB_VERSION_AEAD, BLOB_VERSION_OBFUSCATED,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredTokens {
    tokens: TokenSet,
    account_label: String,
}

fn sample_tokens() -> StoredTokens {
    let mut tokens = TokenSet::new("access-abc123");
    tokens.refresh_token = Some("refresh-def456".to_string());
    tokens.scopes = vec!["ads.read".to_string()];
    StoredTokens { tokens, account_label: "Acme Primary".to_string() }
}

fn test_fingerprint() -> DeviceFingerprint {
    DeviceFingerprint::from_parts(&["it-host", "it-user", "linux", "x86_64"])
}

/// Validates the full lifecycle against a file-backed store.
///
/// # Test Steps
/// 1. Seal tokens into a temp-dir file store and drop the vault
/// 2. Reopen a fresh vault over the same directory and fingerprint
/// 3. Confirm the tokens round-trip and the on-disk blob is AEAD v1
/// 4. Clear and confirm both the vault and the directory forget the blob
#[test]
fn file_backed_lifecycle_round_trips() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let stored = sample_tokens();

    {
        let vault = CredentialVault::with_fingerprint(
            Arc::new(FileStore::new(dir.path())),
            VaultConfig::default(),
            test_fingerprint(),
        );
        vault.store(&stored).expect("store should succeed");
    }

    let store = Arc::new(FileStore::new(dir.path()));
    let armored = store
        .get("credentials.v1")
        .expect("read should succeed")
        .expect("blob should exist on disk");
    let blob = EncryptedBlob::decode(&armored).expect("blob should decode");
    assert_eq!(blob.version, BLOB_VERSION_AEAD);
    assert!(!armored.contains("access-abc123"));

    let vault = CredentialVault::with_fingerprint(
        Arc::clone(&store) as Arc<dyn VaultStore>,
        VaultConfig::default(),
        test_fingerprint(),
    );
    let restored: Option<StoredTokens> = vault.retrieve().expect("retrieve should succeed");
    assert_eq!(restored, Some(stored));

    vault.clear().expect("clear should succeed");
    assert!(store.get("credentials.v1").expect("read should succeed").is_none());
    let after_clear: Option<StoredTokens> = vault.retrieve().expect("retrieve should succeed");
    assert!(after_clear.is_none());
}

/// Validates machine binding: a blob sealed under one fingerprint opens as
/// absent under another.
///
/// # Test Steps
/// 1. Seal tokens on "machine A"
/// 2. Open the same store with machine B's fingerprint
/// 3. Confirm retrieve reports absent credentials, not an error
/// 4. Confirm machine A can still open its own blob
#[test]
fn blob_is_bound_to_sealing_machine() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let stored = sample_tokens();

    let machine_a = CredentialVault::with_fingerprint(
        Arc::new(FileStore::new(dir.path())),
        VaultConfig::default(),
        DeviceFingerprint::from_parts(&["machine-a", "alice"]),
    );
    machine_a.store(&stored).expect("store should succeed");

    let machine_b = CredentialVault::with_fingerprint(
        Arc::new(FileStore::new(dir.path())),
        VaultConfig::default(),
        DeviceFingerprint::from_parts(&["machine-b", "mallory"]),
    );
    let foreign: Option<StoredTokens> = machine_b.retrieve().expect("retrieve should succeed");
    assert!(foreign.is_none());

    let native: Option<StoredTokens> = machine_a.retrieve().expect("retrieve should succeed");
    assert_eq!(native, Some(stored));
}

/// Validates the obfuscation fallback end to end, including its version
/// marker and tamper behavior.
///
/// # Test Steps
/// 1. Seal tokens with obfuscation forced
/// 2. Confirm the blob carries version 0 and no raw token bytes
/// 3. Round-trip the tokens
/// 4. Corrupt one ciphertext byte and confirm retrieve reports absent
#[test]
fn obfuscation_fallback_round_trips_and_detects_corruption() {
    let store = Arc::new(MemoryStore::new());
    let config = VaultConfig { force_obfuscation: true, ..VaultConfig::default() };
    let vault = CredentialVault::with_fingerprint(
        Arc::clone(&store) as Arc<dyn VaultStore>,
        config,
        test_fingerprint(),
    );
    let stored = sample_tokens();

    vault.store(&stored).expect("store should succeed");

    let armored = store
        .get("credentials.v1")
        .expect("read should succeed")
        .expect("blob should exist");
    let blob = EncryptedBlob::decode(&armored).expect("blob should decode");
    assert_eq!(blob.version, BLOB_VERSION_OBFUSCATED);
    assert!(!armored.contains("access-abc123"));

    let restored: Option<StoredTokens> = vault.retrieve().expect("retrieve should succeed");
    assert_eq!(restored, Some(stored));

    let mut tampered = blob;
    tampered.ciphertext[0] ^= 0x80;
    store
        .put("credentials.v1", &tampered.encode().expect("encode should succeed"))
        .expect("put should succeed");
    let after_tamper: Option<StoredTokens> = vault.retrieve().expect("retrieve should succeed");
    assert!(after_tamper.is_none());
}

/// Validates that two vaults with distinct storage keys coexist in one
/// backing store.
#[test]
fn distinct_storage_keys_are_isolated() {
    let store = Arc::new(MemoryStore::new());
    let fingerprint = test_fingerprint();

    let primary = CredentialVault::with_fingerprint(
        Arc::clone(&store) as Arc<dyn VaultStore>,
        VaultConfig::with_storage_key("primary.credentials"),
        fingerprint.clone(),
    );
    let sandbox = CredentialVault::with_fingerprint(
        Arc::clone(&store) as Arc<dyn VaultStore>,
        VaultConfig::with_storage_key("sandbox.credentials"),
        fingerprint,
    );

    let primary_tokens = sample_tokens();
    let mut sandbox_tokens = sample_tokens();
    sandbox_tokens.account_label = "Acme Sandbox".to_string();

    primary.store(&primary_tokens).expect("store should succeed");
    sandbox.store(&sandbox_tokens).expect("store should succeed");

    let restored_primary: Option<StoredTokens> =
        primary.retrieve().expect("retrieve should succeed");
    let restored_sandbox: Option<StoredTokens> =
        sandbox.retrieve().expect("retrieve should succeed");
    assert_eq!(restored_primary, Some(primary_tokens));
    assert_eq!(restored_sandbox, Some(sandbox_tokens));

    primary.clear().expect("clear should succeed");
    let after_clear: Option<StoredTokens> = sandbox.retrieve().expect("retrieve should succeed");
    assert!(after_clear.is_some());
}

/// Validates concurrent sealed reads through a shared vault.
///
/// # Test Steps
/// 1. Seal tokens once
/// 2. Spawn several threads retrieving through the same vault
/// 3. Confirm every thread observes the stored tokens
#[test]
fn concurrent_retrieves_share_cached_key() {
    let store = Arc::new(MemoryStore::new());
    let vault = Arc::new(CredentialVault::with_fingerprint(
        Arc::clone(&store) as Arc<dyn VaultStore>,
        VaultConfig::default(),
        test_fingerprint(),
    ));
    let stored = sample_tokens();
    vault.store(&stored).expect("store should succeed");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let vault = Arc::clone(&vault);
        let expected = stored.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..5 {
                let restored: Option<StoredTokens> =
                    vault.retrieve().expect("retrieve should succeed");
                assert_eq!(restored.as_ref(), Some(&expected));
            }
        }));
    }
    for handle in handles {
        handle.join().expect("thread should not panic");
    }
}
