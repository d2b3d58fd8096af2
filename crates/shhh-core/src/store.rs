//! Ephemeral, single-read secret store
//!
//! Holds sealed secrets in memory under random identifiers. Each secret can be
//! read at most once and only until its deadline; a background sweeper evicts
//! expired entries without waiting for a read.
//!
//! # Locking
//!
//! One `RwLock` guards the index. It is only ever held for a map operation;
//! key derivation and AEAD work always run with the lock released. Capacity is
//! checked twice around the unlocked encryption step: once optimistically to
//! fail fast, once authoritatively right before insertion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use zeroize::Zeroizing;

use crate::cipher::{CipherError, PassphraseCipher, SecretCipher};

/// Longest display name kept, in bytes
pub const MAX_NAME_LEN: usize = 255;

/// Shortest period the sweeper will tick at
pub const MIN_SWEEP_INTERVAL: StdDuration = StdDuration::from_millis(1);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("TTL must be positive")]
    InvalidTtl,
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: u64 },
    #[error("store is full ({max_items} items)")]
    StoreFull { max_items: usize },
    #[error("OS random source failed")]
    RandomSourceFailure,
    #[error("encryption failed: {0}")]
    Encryption(CipherError),
}

impl From<CipherError> for StoreError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::RandomSourceFailure => StoreError::RandomSourceFailure,
            other => StoreError::Encryption(other),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveError {
    #[error("secret not found")]
    NotFound,
    #[error("secret expired")]
    Expired,
    #[error("wrong passphrase or corrupted data")]
    AuthenticationFailed,
}

impl RetrieveError {
    /// `NotFound` and `Expired` must look the same to anyone probing for ids.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RetrieveError::NotFound | RetrieveError::Expired)
    }
}

/// Limits the store enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub max_items: usize,
    pub max_payload_bytes: u64,
    /// Upper clamp on any requested TTL
    pub max_retention: Duration,
    /// How often the sweeper wakes, independent of item TTLs
    pub sweep_interval: StdDuration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_payload_bytes: 10 * 1024 * 1024,
            max_retention: Duration::hours(24),
            sweep_interval: StdDuration::from_secs(60),
        }
    }
}

struct SecretItem {
    /// salt || nonce || ciphertext || tag
    ciphertext: Vec<u8>,
    /// Sanitized display name; empty for text secrets
    name: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl SecretItem {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

type Index = Arc<RwLock<HashMap<String, SecretItem>>>;

/// What the caller gets back from a successful [`EphemeralStore::store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReceipt {
    pub id: String,
    /// The name as actually stored, after sanitization
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A consumed secret. The payload is wiped when dropped.
pub struct RetrievedSecret {
    pub payload: Zeroizing<Vec<u8>>,
    pub name: String,
}

impl std::fmt::Debug for RetrievedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievedSecret")
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .field("name", &self.name)
            .finish()
    }
}

impl RetrievedSecret {
    /// Whether this secret was stored as a file rather than text.
    pub fn is_file(&self) -> bool {
        !self.name.is_empty()
    }
}

/// In-memory store of sealed, single-read secrets.
///
/// Must be created from within a Tokio runtime: construction spawns the
/// sweeper task.
pub struct EphemeralStore {
    index: Index,
    config: StoreConfig,
    cipher: Arc<dyn SecretCipher>,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl EphemeralStore {
    /// Create a store sealing with Argon2id + AES-256-GCM.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_cipher(config, Arc::new(PassphraseCipher))
    }

    /// Create a store sealing with `cipher`.
    pub fn with_cipher(config: StoreConfig, cipher: Arc<dyn SecretCipher>) -> Self {
        let index: Index = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // tokio's interval panics on a zero period
        let sweep_every = config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        if sweep_every != config.sweep_interval {
            log::warn!(
                "sweep interval {:?} too short, using {:?}",
                config.sweep_interval,
                sweep_every
            );
        }
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&index), sweep_every, shutdown_rx));

        log::debug!(
            "secret store started (max_items={}, max_payload_bytes={}, sweep every {:?})",
            config.max_items,
            config.max_payload_bytes,
            sweep_every
        );

        Self {
            index,
            config,
            cipher,
            shutdown_tx,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of items currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seal `payload` under `passphrase` and keep it for at most `ttl`.
    ///
    /// `ttl` is clamped to the configured maximum retention. A non-empty
    /// `name` marks the secret as a file.
    pub fn store(
        &self,
        payload: &[u8],
        name: &str,
        passphrase: &str,
        ttl: Duration,
    ) -> Result<StoreReceipt, StoreError> {
        // Clamp first so a non-positive retention limit rejects everything
        let ttl = ttl.min(self.config.max_retention);
        if ttl <= Duration::zero() {
            return Err(StoreError::InvalidTtl);
        }

        if payload.len() as u64 > self.config.max_payload_bytes {
            return Err(StoreError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_bytes,
            });
        }

        let name = sanitize_name(name);

        // Fail fast before paying for key derivation
        if self.index.read().len() >= self.config.max_items {
            return Err(StoreError::StoreFull {
                max_items: self.config.max_items,
            });
        }

        let ciphertext = self.cipher.seal(payload, passphrase)?;
        let id = generate_id()?;

        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(ttl)
            .ok_or(StoreError::InvalidTtl)?;

        {
            let mut index = self.index.write();
            // Other writers may have filled the store while we were encrypting
            if index.len() >= self.config.max_items {
                return Err(StoreError::StoreFull {
                    max_items: self.config.max_items,
                });
            }
            index.insert(
                id.clone(),
                SecretItem {
                    ciphertext,
                    name: name.clone(),
                    created_at,
                    expires_at,
                },
            );
        }

        log::debug!("stored secret {} (expires {})", id, expires_at.to_rfc3339());

        Ok(StoreReceipt {
            id,
            name,
            created_at,
            expires_at,
        })
    }

    /// Consume the secret stored under `id`.
    ///
    /// Any attempt that finds a live item removes it, whether or not the
    /// passphrase is right.
    pub fn retrieve(&self, id: &str, passphrase: &str) -> Result<RetrievedSecret, RetrieveError> {
        let now = Utc::now();

        let live = match self.index.read().get(id) {
            None => return Err(RetrieveError::NotFound),
            Some(item) if item.is_expired(now) => None,
            Some(item) => Some((item.ciphertext.clone(), item.name.clone(), item.created_at)),
        };

        let Some((ciphertext, name, created_at)) = live else {
            let mut index = self.index.write();
            // Another reader may have taken it between the two locks
            if !index.get(id).is_some_and(|item| item.is_expired(now)) {
                return Err(RetrieveError::NotFound);
            }
            index.remove(id);
            log::debug!("evicted expired secret {} on read", id);
            return Err(RetrieveError::Expired);
        };

        let opened = self.cipher.open(&ciphertext, passphrase);

        // Only the caller whose delete lands may see the plaintext
        if self.index.write().remove(id).is_none() {
            return Err(RetrieveError::NotFound);
        }

        match opened {
            Ok(payload) => {
                log::debug!(
                    "consumed secret {} {}s after creation",
                    id,
                    (now - created_at).num_seconds()
                );
                Ok(RetrievedSecret { payload, name })
            }
            Err(_) => {
                log::debug!("secret {} burned by failed decryption", id);
                Err(RetrieveError::AuthenticationFailed)
            }
        }
    }

    /// Remove every expired item now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        sweep_expired(&self.index, Utc::now())
    }

    /// Stop the sweeper and wait for it to exit. Safe to call more than once
    /// and from any task.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("sweeper task ended abnormally: {}", e);
            }
            log::debug!("secret store sweeper stopped");
        }
    }
}

impl Drop for EphemeralStore {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Collect expired ids under the read lock, then delete them in one batch.
fn sweep_expired(index: &RwLock<HashMap<String, SecretItem>>, now: DateTime<Utc>) -> usize {
    let expired: Vec<String> = index
        .read()
        .iter()
        .filter(|(_, item)| item.is_expired(now))
        .map(|(id, _)| id.clone())
        .collect();

    if expired.is_empty() {
        return 0;
    }

    let mut index = index.write();
    expired
        .iter()
        .filter(|id| index.remove(id.as_str()).is_some())
        .count()
}

async fn sweep_loop(index: Index, period: StdDuration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // skip first immediate tick

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = sweep_expired(&index, Utc::now());
                if removed > 0 {
                    log::debug!("swept {} expired secret(s)", removed);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// 128 random bits with UUIDv4 version/variant bits, as 32 lowercase hex chars.
fn generate_id() -> Result<String, StoreError> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| StoreError::RandomSourceFailure)?;
    let id = uuid::Builder::from_random_bytes(bytes).into_uuid();
    Ok(id.simple().to_string())
}

/// Make a display name safe to echo back in a download disposition.
///
/// Strips path separators, `..` and control characters, then truncates to
/// [`MAX_NAME_LEN`] bytes on a character boundary.
pub fn sanitize_name(name: &str) -> String {
    let mut clean: String = name
        .replace(['/', '\\'], "")
        .replace("..", "")
        .chars()
        .filter(|c| !c.is_control())
        .collect();

    if clean.len() > MAX_NAME_LEN {
        let mut end = MAX_NAME_LEN;
        while !clean.is_char_boundary(end) {
            end -= 1;
        }
        clean.truncate(end);
    }
    clean
}
