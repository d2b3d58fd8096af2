//! Concurrency tests for the ephemeral store.
//!
//! These tests verify:
//! 1. Capacity holds exactly under concurrent stores
//! 2. Only one concurrent retrieve can win a secret
//! 3. The sweeper runs alongside readers and writers
//! 4. Shutdown can be driven from another thread

use chrono::Duration;
use shhh_core::{
    CipherError, EphemeralStore, RetrieveError, SecretCipher, StoreConfig, StoreError,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration as StdDuration;
use zeroize::Zeroizing;

/// Prefixes the payload with the passphrase and stalls on every call, so that
/// concurrent callers pile up inside the unlocked section of the store.
struct SlowTagCipher {
    delay: StdDuration,
}

impl SecretCipher for SlowTagCipher {
    fn seal(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>, CipherError> {
        thread::sleep(self.delay);
        let mut blob = (passphrase.len() as u32).to_be_bytes().to_vec();
        blob.extend_from_slice(passphrase.as_bytes());
        blob.extend_from_slice(plaintext);
        Ok(blob)
    }

    fn open(&self, blob: &[u8], passphrase: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        thread::sleep(self.delay);
        if blob.len() < 4 {
            return Err(CipherError::MalformedCiphertext);
        }
        let len = u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
        let rest = &blob[4..];
        if rest.len() < len || &rest[..len] != passphrase.as_bytes() {
            return Err(CipherError::AuthenticationFailed);
        }
        Ok(Zeroizing::new(rest[len..].to_vec()))
    }
}

fn slow_store(max_items: usize, sweep_interval: StdDuration) -> EphemeralStore {
    EphemeralStore::with_cipher(
        StoreConfig {
            max_items,
            max_payload_bytes: 1024,
            max_retention: Duration::hours(1),
            sweep_interval,
        },
        Arc::new(SlowTagCipher {
            delay: StdDuration::from_millis(50),
        }),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_stores_never_exceed_capacity() {
    const WRITERS: usize = 12;
    let store = slow_store(3, StdDuration::from_secs(3600));
    let barrier = Barrier::new(WRITERS);

    let results: Vec<Result<_, StoreError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let store = &store;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    store.store(
                        format!("payload {}", i).as_bytes(),
                        "",
                        "pw",
                        Duration::seconds(60),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let stored = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(stored, 3, "exactly max_items stores may succeed");
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == StoreError::StoreFull { max_items: 3 }));
    assert_eq!(store.len(), 3);

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_retrieves_have_one_winner() {
    const READERS: usize = 8;
    let store = slow_store(10, StdDuration::from_secs(3600));
    let receipt = store
        .store(b"only once", "", "pw", Duration::seconds(60))
        .unwrap();
    let barrier = Barrier::new(READERS);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..READERS)
            .map(|_| {
                let store = &store;
                let barrier = &barrier;
                let id = receipt.id.as_str();
                s.spawn(move || {
                    barrier.wait();
                    store
                        .retrieve(id, "pw")
                        .map(|secret| secret.payload.to_vec())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one reader may see the plaintext");
    assert_eq!(winners[0].as_slice(), b"only once");
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == RetrieveError::NotFound));
    assert!(store.is_empty());

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_guess_burns_secret_for_rightful_reader() {
    let store = slow_store(10, StdDuration::from_secs(3600));
    let receipt = store
        .store(b"guarded", "", "right", Duration::seconds(60))
        .unwrap();

    // The wrong guess lands first; the right one arrives after the burn
    let wrong = store.retrieve(&receipt.id, "wrong").unwrap_err();
    let right = store.retrieve(&receipt.id, "right").unwrap_err();

    assert_eq!(wrong, RetrieveError::AuthenticationFailed);
    assert_eq!(right, RetrieveError::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweeper_runs_alongside_traffic() {
    let store = slow_store(100, StdDuration::from_millis(20));

    let short_lived: Vec<String> = (0..5)
        .map(|i| {
            store
                .store(
                    format!("short {}", i).as_bytes(),
                    "",
                    "pw",
                    Duration::milliseconds(1),
                )
                .unwrap()
                .id
        })
        .collect();
    let long_lived = store
        .store(b"long", "", "pw", Duration::seconds(60))
        .unwrap();

    tokio::time::sleep(StdDuration::from_millis(200)).await;

    assert_eq!(store.len(), 1, "sweeper should have removed expired items");
    for id in &short_lived {
        assert!(store.retrieve(id, "pw").unwrap_err().is_unavailable());
    }
    assert_eq!(
        store
            .retrieve(&long_lived.id, "pw")
            .unwrap()
            .payload
            .as_slice(),
        b"long"
    );

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_from_another_thread() {
    let store = Arc::new(slow_store(10, StdDuration::from_millis(10)));
    let handle = tokio::runtime::Handle::current();

    let remote = Arc::clone(&store);
    let joined = thread::spawn(move || {
        handle.block_on(remote.shutdown());
        // Second call is a no-op
        handle.block_on(remote.shutdown());
    });
    tokio::task::spawn_blocking(move || joined.join().unwrap())
        .await
        .unwrap();

    // Without the sweeper, expired items linger until read or swept by hand
    store
        .store(b"late", "", "pw", Duration::milliseconds(1))
        .unwrap();
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert_eq!(store.len(), 1);
    assert_eq!(store.sweep(), 1);
}
