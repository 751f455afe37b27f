//! # Envelope Encryption
//!
//! Every secret gets its own random data key. The value is encrypted under
//! the data key, and the data key is encrypted under the master key:
//!
//! ```text
//! value ──AES-GCM(data_key)──► encrypted_value
//! data_key ──AES-GCM(master)──► encrypted_data_key
//! ```
//!
//! The master key never leaves the [`KeyManager`]; both directions go
//! through its `encrypt`/`decrypt`, which fail with `KeyLocked` while
//! sealed. A wrong master key and a corrupted record are indistinguishable
//! here: both surface as a cipher error.

use zeroize::Zeroizing;

use crate::crypto::encryption::{self, generate_key};
use crate::seal::manager::{KeyManager, KeyManagerError};

/// The two ciphertexts that make up a stored secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedValue {
    pub encrypted_data_key: Vec<u8>,
    pub encrypted_value: Vec<u8>,
}

/// Encrypt `plaintext` under a fresh data key, and the data key under the
/// master key.
pub fn seal_value(km: &KeyManager, plaintext: &[u8]) -> Result<SealedValue, KeyManagerError> {
    let data_key = generate_key();
    let encrypted_data_key = km.encrypt(&data_key)?;
    let encrypted_value = encryption::encrypt(&data_key, plaintext)?;
    Ok(SealedValue {
        encrypted_data_key,
        encrypted_value,
    })
}

/// Inverse of [`seal_value`].
pub fn open_value(
    km: &KeyManager,
    encrypted_data_key: &[u8],
    encrypted_value: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KeyManagerError> {
    let data_key = km.decrypt(encrypted_data_key)?;
    let plaintext = encryption::decrypt(&data_key, encrypted_value)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encryption::EncryptionError;

    fn unlocked() -> KeyManager {
        let km = KeyManager::new();
        km.set_new_master_key(&generate_key(), 1, 1).unwrap();
        km
    }

    #[test]
    fn seal_then_open() {
        let km = unlocked();
        let sealed = seal_value(&km, b"hunter2").unwrap();
        let opened = open_value(&km, &sealed.encrypted_data_key, &sealed.encrypted_value).unwrap();
        assert_eq!(opened.as_slice(), b"hunter2");
    }

    #[test]
    fn each_value_gets_its_own_data_key() {
        let km = unlocked();
        let a = seal_value(&km, b"same").unwrap();
        let b = seal_value(&km, b"same").unwrap();
        let key_a = km.decrypt(&a.encrypted_data_key).unwrap();
        let key_b = km.decrypt(&b.encrypted_data_key).unwrap();
        assert_ne!(key_a.as_slice(), key_b.as_slice());
    }

    #[test]
    fn value_is_not_readable_with_master_key_directly() {
        let km = unlocked();
        let sealed = seal_value(&km, b"layered").unwrap();
        assert!(km.decrypt(&sealed.encrypted_value).is_err());
    }

    #[test]
    fn sealed_manager_refuses_both_directions() {
        let km = unlocked();
        let sealed = seal_value(&km, b"v").unwrap();
        km.rollback_to_locked();

        assert_eq!(seal_value(&km, b"v"), Err(KeyManagerError::KeyLocked));
        assert_eq!(
            open_value(&km, &sealed.encrypted_data_key, &sealed.encrypted_value),
            Err(KeyManagerError::KeyLocked)
        );
    }

    #[test]
    fn different_master_key_fails_to_open() {
        let sealed = seal_value(&unlocked(), b"v").unwrap();
        let other = unlocked();
        assert_eq!(
            open_value(&other, &sealed.encrypted_data_key, &sealed.encrypted_value),
            Err(KeyManagerError::Cipher(EncryptionError::DecryptFailed))
        );
    }

    #[test]
    fn tampered_value_fails_to_open() {
        let km = unlocked();
        let mut sealed = seal_value(&km, b"v").unwrap();
        sealed.encrypted_value[14] ^= 0x01;
        assert!(open_value(&km, &sealed.encrypted_data_key, &sealed.encrypted_value).is_err());
    }
}
