//! Security tests for sealed blobs and the store built on them.
//!
//! Every check here goes through the real Argon2id + AES-256-GCM cipher.

use chrono::Duration;
use shhh_core::cipher::{NONCE_LEN, SALT_LEN, TAG_LEN};
use shhh_core::{
    decrypt, encrypt, CipherError, EphemeralStore, RetrieveError, SealedBlob, StoreConfig,
};
use std::time::Duration as StdDuration;

const PASSPHRASE: &str = "correct horse battery staple";

// ============================================================================
// Tampering
// ============================================================================

fn assert_flip_detected(offset: usize) {
    let mut blob = encrypt(b"tamper target", PASSPHRASE).unwrap();
    blob[offset] ^= 0x01;
    assert_eq!(
        decrypt(&blob, PASSPHRASE).unwrap_err(),
        CipherError::AuthenticationFailed,
        "bit flip at offset {} went unnoticed",
        offset
    );
}

#[test]
fn test_tampered_salt_rejected() {
    assert_flip_detected(0);
    assert_flip_detected(SALT_LEN - 1);
}

#[test]
fn test_tampered_nonce_rejected() {
    assert_flip_detected(SALT_LEN);
    assert_flip_detected(SALT_LEN + NONCE_LEN - 1);
}

#[test]
fn test_tampered_body_and_tag_rejected() {
    let len = SALT_LEN + NONCE_LEN + b"tamper target".len() + TAG_LEN;
    assert_flip_detected(SALT_LEN + NONCE_LEN);
    assert_flip_detected(len - 1);
}

#[test]
fn test_appended_bytes_rejected() {
    let mut blob = encrypt(b"exact length", PASSPHRASE).unwrap();
    blob.push(0);
    assert_eq!(
        decrypt(&blob, PASSPHRASE).unwrap_err(),
        CipherError::AuthenticationFailed
    );
}

// ============================================================================
// Truncation
// ============================================================================

#[test]
fn test_truncated_blobs_never_panic() {
    let blob = encrypt(b"truncate me", PASSPHRASE).unwrap();

    for len in 0..blob.len() {
        let err = decrypt(&blob[..len], PASSPHRASE).unwrap_err();
        if len < SALT_LEN + NONCE_LEN {
            assert_eq!(err, CipherError::MalformedCiphertext, "length {}", len);
        } else {
            assert_eq!(err, CipherError::AuthenticationFailed, "length {}", len);
        }
    }
}

#[test]
fn test_header_parsing_is_total() {
    for len in 0..64 {
        let bytes = vec![0xA5u8; len];
        match SealedBlob::from_bytes(&bytes) {
            Ok(blob) => {
                assert!(len >= SALT_LEN + NONCE_LEN);
                assert_eq!(blob.to_bytes(), bytes);
            }
            Err(e) => {
                assert!(len < SALT_LEN + NONCE_LEN);
                assert_eq!(e, CipherError::MalformedCiphertext);
            }
        }
    }
}

// ============================================================================
// Store behaviour
// ============================================================================

fn store() -> EphemeralStore {
    EphemeralStore::new(StoreConfig {
        max_items: 16,
        max_payload_bytes: 4096,
        max_retention: Duration::hours(1),
        sweep_interval: StdDuration::from_secs(3600),
    })
}

#[tokio::test]
async fn test_one_guess_per_secret() {
    let store = store();
    let receipt = store
        .store(b"launch codes", "", PASSPHRASE, Duration::minutes(5))
        .unwrap();

    assert_eq!(
        store.retrieve(&receipt.id, "guess").unwrap_err(),
        RetrieveError::AuthenticationFailed
    );
    // The rightful reader cannot recover it after a bad guess
    assert_eq!(
        store.retrieve(&receipt.id, PASSPHRASE).unwrap_err(),
        RetrieveError::NotFound
    );

    store.shutdown().await;
}

#[tokio::test]
async fn test_ids_are_unique_and_unguessable_shape() {
    let store = store();
    let mut ids = std::collections::HashSet::new();

    for i in 0..4 {
        let receipt = store
            .store(format!("item {}", i).as_bytes(), "", "pw", Duration::minutes(1))
            .unwrap();
        assert_eq!(receipt.id.len(), 32);
        assert!(ids.insert(receipt.id));
    }

    for id in &ids {
        let secret = store.retrieve(id, "pw").unwrap();
        assert!(secret.payload.starts_with(b"item "));
    }
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_hostile_file_name_is_neutralized() {
    let store = store();
    let receipt = store
        .store(b"payload", "../../\r\n../passwd", PASSPHRASE, Duration::minutes(1))
        .unwrap();
    assert_eq!(receipt.name, "passwd");

    let secret = store.retrieve(&receipt.id, PASSPHRASE).unwrap();
    assert_eq!(secret.name, "passwd");
    assert!(secret.is_file());
    // Debug output reports the size, never the bytes
    assert!(format!("{:?}", secret).contains("<7 bytes>"));
}

#[tokio::test]
async fn test_expired_secret_is_indistinguishable_from_missing() {
    let store = store();
    let receipt = store
        .store(b"fleeting", "", PASSPHRASE, Duration::milliseconds(1))
        .unwrap();

    tokio::time::sleep(StdDuration::from_millis(20)).await;

    let expired = store.retrieve(&receipt.id, PASSPHRASE).unwrap_err();
    let missing = store
        .retrieve("0123456789abcdef0123456789abcdef", PASSPHRASE)
        .unwrap_err();
    assert!(expired.is_unavailable());
    assert!(missing.is_unavailable());
}
