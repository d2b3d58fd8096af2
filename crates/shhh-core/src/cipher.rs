//! Passphrase-based authenticated encryption
//!
//! Every secret is sealed with Argon2id + AES-256-GCM under a key derived from
//! the caller's passphrase.
//!
//! # Security Notes
//!
//! - Argon2id is memory-hard (resistant to GPU/ASIC attacks)
//! - AES-256-GCM provides authenticated encryption
//! - Every seal samples a fresh salt and nonce from the OS CSPRNG
//! - The passphrase is never stored; a wrong one only surfaces as a tag mismatch

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// Argon2id parameters. Fixed for the whole process so a caller can never
/// downgrade the derivation cost.
/// - m_cost: 64 MiB memory
/// - t_cost: 3 iterations
/// - p_cost: 4 lanes
const ARGON2_M_COST: u32 = 65536; // 64 MiB
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32; // 256 bits for AES-256

/// Salt length for Argon2
pub const SALT_LEN: usize = 16;

/// Nonce length for AES-256-GCM
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag appended to every ciphertext
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("OS random source failed")]
    RandomSourceFailure,
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Ciphertext is shorter than salt and nonce")]
    MalformedCiphertext,
    #[error("Wrong passphrase or corrupted data")]
    AuthenticationFailed,
}

/// Sealed blob format:
/// [salt (16 bytes)][nonce (12 bytes)][ciphertext + tag (len + 16 bytes)]
///
/// This layout is the only binary format the store exposes and must stay
/// stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    /// Salt used for Argon2id key derivation
    salt: [u8; SALT_LEN],
    /// Nonce used for AES-256-GCM
    nonce: [u8; NONCE_LEN],
    /// Encrypted payload + authentication tag
    ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Serialize to bytes: salt || nonce || ciphertext
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SALT_LEN + NONCE_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Deserialize from bytes.
    ///
    /// Only the salt and nonce are length-checked; a body too short to hold a
    /// tag is left for the AEAD to reject.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() < SALT_LEN + NONCE_LEN {
            return Err(CipherError::MalformedCiphertext);
        }

        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];

        salt.copy_from_slice(&bytes[0..SALT_LEN]);
        nonce.copy_from_slice(&bytes[SALT_LEN..SALT_LEN + NONCE_LEN]);
        let ciphertext = bytes[SALT_LEN + NONCE_LEN..].to_vec();

        Ok(Self {
            salt,
            nonce,
            ciphertext,
        })
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }
}

/// Derive an encryption key from a passphrase using Argon2id
fn derive_key(
    passphrase: &str,
    salt: &[u8; SALT_LEN],
) -> Result<Zeroizing<[u8; ARGON2_OUTPUT_LEN]>, CipherError> {
    let params = Params::new(
        ARGON2_M_COST,
        ARGON2_T_COST,
        ARGON2_P_COST,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; ARGON2_OUTPUT_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
        .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;

    Ok(key)
}

fn fill_random(buf: &mut [u8]) -> Result<(), CipherError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|_| CipherError::RandomSourceFailure)
}

/// Seal `plaintext` under `passphrase` into a [`SealedBlob`].
///
/// Each call generates a new random salt and nonce, so sealing the same input
/// twice never yields the same blob.
pub fn seal(plaintext: &[u8], passphrase: &str) -> Result<SealedBlob, CipherError> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;

    let key = derive_key(passphrase, &salt)?;

    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CipherError::EncryptionFailed)?;

    Ok(SealedBlob {
        salt,
        nonce,
        ciphertext,
    })
}

/// Open a [`SealedBlob`] with `passphrase`.
///
/// # Errors
/// Returns [`CipherError::AuthenticationFailed`] if the passphrase is wrong or
/// any byte of the blob was altered.
pub fn open(sealed: &SealedBlob, passphrase: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let key = derive_key(passphrase, &sealed.salt)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
        .map_err(|_| CipherError::AuthenticationFailed)?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt `plaintext`, returning `salt || nonce || ciphertext_with_tag`.
pub fn encrypt(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>, CipherError> {
    seal(plaintext, passphrase).map(|sealed| sealed.to_bytes())
}

/// Decrypt a blob produced by [`encrypt`].
pub fn decrypt(blob: &[u8], passphrase: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let sealed = SealedBlob::from_bytes(blob)?;
    open(&sealed, passphrase)
}

/// The cipher seen by the store.
///
/// The store only ever handles serialized blobs, so the trait speaks bytes.
pub trait SecretCipher: Send + Sync {
    fn seal(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>, CipherError>;

    fn open(&self, blob: &[u8], passphrase: &str) -> Result<Zeroizing<Vec<u8>>, CipherError>;
}

/// Argon2id + AES-256-GCM, the cipher used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassphraseCipher;

impl SecretCipher for PassphraseCipher {
    fn seal(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>, CipherError> {
        encrypt(plaintext, passphrase)
    }

    fn open(&self, blob: &[u8], passphrase: &str) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        decrypt(blob, passphrase)
    }
}
