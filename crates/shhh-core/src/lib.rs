//! shhh Core
//!
//! Ephemeral, encrypted, single-read secret storage.
//!
//! # Sealing
//!
//! Payloads are sealed with Argon2id + AES-256-GCM under a key derived from a
//! caller-supplied passphrase. The blob layout is `salt || nonce || ciphertext`.
//!
//! # Storage
//!
//! [`EphemeralStore`] keeps sealed payloads in memory. Every secret can be read
//! once, until its deadline; a background sweeper evicts what nobody read.

pub mod cipher;
pub mod memory;
pub mod store;

pub use cipher::{decrypt, encrypt, CipherError, PassphraseCipher, SealedBlob, SecretCipher};
pub use store::{
    EphemeralStore, RetrieveError, RetrievedSecret, StoreConfig, StoreError, StoreReceipt,
};
