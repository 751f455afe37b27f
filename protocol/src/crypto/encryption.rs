//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for keyseal. The master key protects the
//! checksum and every per-secret data key; data keys protect secret values.
//! All three go through the same two functions below.
//!
//! ## Nonce management
//!
//! Random 96-bit nonces from the OS CSPRNG, one per message. A master key
//! encrypts one checksum plus one data key per secret, nowhere near the
//! ~2^48 birthday bound for random GCM nonces.
//!
//! ## Wire format
//!
//! `encrypt()` returns `nonce || ciphertext || tag` as a single `Vec<u8>`.
//! `decrypt()` expects the same layout. Where a ciphertext has to live in a
//! string column (the persisted checksum), it is base64-encoded with
//! [`encode_base64`].

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// "Wrong key" and "corrupted ciphertext" are the same error on purpose:
/// GCM cannot tell them apart, and neither should callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("invalid key length: expected {AES_KEY_LENGTH} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("ciphertext too short: must be at least {AES_NONCE_LENGTH} bytes")]
    CiphertextTooShort,

    #[error("invalid base64 ciphertext: {0}")]
    InvalidEncoding(String),
}

/// Generate a fresh random AES-256 key.
///
/// Used for the master key and for every per-secret data key. The buffer is
/// wiped when dropped.
pub fn generate_key() -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; AES_KEY_LENGTH]);
    rand::rngs::OsRng.fill_bytes(key.as_mut_slice());
    key
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, EncryptionError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(EncryptionError::InvalidKeyLength(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength(key.len()))
}

/// Encrypt plaintext with AES-256-GCM using a random nonce.
///
/// Returns `nonce || ciphertext`, where the ciphertext carries the 16-byte
/// GCM tag. The key must be exactly 32 bytes.
///
/// # Example
///
/// ```
/// use keyseal_protocol::crypto::encryption::{decrypt, encrypt, generate_key};
///
/// let key = generate_key();
/// let sealed = encrypt(&key, b"database password").unwrap();
/// assert_eq!(decrypt(&key, &sealed).unwrap(), b"database password");
/// ```
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let cipher = cipher_for(key)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data previously produced by [`encrypt`].
///
/// # Errors
///
/// [`EncryptionError::DecryptFailed`] when the key is wrong or the data was
/// modified. The two cases are indistinguishable.
pub fn decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if data.len() < AES_NONCE_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let cipher = cipher_for(key)?;
    let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| EncryptionError::DecryptFailed)
}

/// Base64 (standard alphabet, padded) encoding for ciphertexts and shares
/// that cross a string boundary.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Inverse of [`encode_base64`].
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, EncryptionError> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| EncryptionError::InvalidEncoding(e.to_string()))
}

/// Decrypt a base64-encoded `nonce || ciphertext` string.
pub fn decrypt_base64(key: &[u8], encoded: &str) -> Result<Vec<u8>, EncryptionError> {
    let data = decode_base64(encoded)?;
    decrypt(key, &data)
}
