//! At-rest representation of a secret.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One envelope-encrypted secret.
///
/// `encrypted_data_key` is a random data key sealed under the master key;
/// `encrypted_value` is the plaintext sealed under that data key. Both use
/// the `nonce || ciphertext || tag` layout from
/// [`crate::crypto::encryption`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub id: Uuid,
    pub path: String,
    pub encrypted_data_key: Vec<u8>,
    pub encrypted_value: Vec<u8>,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds.
    pub updated_at: u64,
}

impl SecretRecord {
    /// A new record with a fresh id, stamped with the current time.
    pub fn new(path: impl Into<String>, encrypted_data_key: Vec<u8>, encrypted_value: Vec<u8>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            encrypted_data_key,
            encrypted_value,
            created_at: now,
            updated_at: now,
        }
    }

    /// The same record (same id, same creation time) with new ciphertexts.
    pub fn reencrypted(&self, encrypted_data_key: Vec<u8>, encrypted_value: Vec<u8>) -> Self {
        Self {
            id: self.id,
            path: self.path.clone(),
            encrypted_data_key,
            encrypted_value,
            created_at: self.created_at,
            updated_at: now_millis().max(self.created_at),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
