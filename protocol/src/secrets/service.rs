//! # Secrets Service
//!
//! CRUD over envelope-encrypted secrets. Every read and write needs the
//! master key, so every operation fails with [`SecretsError::KeyLocked`]
//! while the vault is sealed.
//!
//! User paths must start with `/`. Paths under [`RESERVED_PATH_PREFIX`]
//! belong to the service: they cannot be addressed through the path-based
//! operations and are left out of [`SecretsService::list_secrets`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use super::envelope::{open_value, seal_value};
use crate::config::{RESERVED_PATH_PREFIX, SIGNING_KEY_PATH};
use crate::seal::manager::{KeyManager, KeyManagerError, SealState};
use crate::storage::{SecretRecord, SecretStore, StoreError};

/// Errors returned by [`SecretsService`].
#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("invalid secret path: {0}")]
    InvalidPath(String),

    #[error("secret already exists: {0}")]
    AlreadyExists(String),

    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("master key is locked")]
    KeyLocked,

    #[error("failed to encrypt secret")]
    Encryption,

    #[error("failed to decrypt secret")]
    Decryption,

    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for SecretsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => SecretsError::NotFound(path),
            StoreError::AlreadyExists(path) => SecretsError::AlreadyExists(path),
            other => SecretsError::Storage(other),
        }
    }
}

fn seal_error(e: KeyManagerError) -> SecretsError {
    match e {
        KeyManagerError::KeyLocked => SecretsError::KeyLocked,
        _ => SecretsError::Encryption,
    }
}

fn open_error(e: KeyManagerError) -> SecretsError {
    match e {
        KeyManagerError::KeyLocked => SecretsError::KeyLocked,
        _ => SecretsError::Decryption,
    }
}

/// Metadata of a stored secret. Never carries the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSummary {
    pub path: String,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<&SecretRecord> for SecretSummary {
    fn from(record: &SecretRecord) -> Self {
        Self {
            path: record.path.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Validate a caller-supplied path.
pub fn validate_path(path: &str) -> Result<(), SecretsError> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(SecretsError::InvalidPath(path.to_string()));
    }
    Ok(())
}

pub struct SecretsService {
    key_manager: Arc<KeyManager>,
    store: Arc<dyn SecretStore>,
}

impl SecretsService {
    pub fn new(key_manager: Arc<KeyManager>, store: Arc<dyn SecretStore>) -> Self {
        Self { key_manager, store }
    }

    pub fn create_secret(&self, path: &str, value: &[u8]) -> Result<SecretSummary, SecretsError> {
        validate_path(path)?;
        if self.store.get_secret(path)?.is_some() {
            return Err(SecretsError::AlreadyExists(path.to_string()));
        }

        let sealed = seal_value(&self.key_manager, value).map_err(seal_error)?;
        let record = SecretRecord::new(path, sealed.encrypted_data_key, sealed.encrypted_value);
        self.store.create_secret(&record)?;

        tracing::info!(path, "secret created");
        Ok(SecretSummary::from(&record))
    }

    pub fn get_secret_by_path(&self, path: &str) -> Result<Zeroizing<Vec<u8>>, SecretsError> {
        validate_path(path)?;
        self.read(path)
    }

    /// Replace the value, re-encrypting under a fresh data key.
    pub fn update_secret(&self, path: &str, value: &[u8]) -> Result<SecretSummary, SecretsError> {
        validate_path(path)?;
        let existing = self
            .store
            .get_secret(path)?
            .ok_or_else(|| SecretsError::NotFound(path.to_string()))?;

        let sealed = seal_value(&self.key_manager, value).map_err(seal_error)?;
        let record = existing.reencrypted(sealed.encrypted_data_key, sealed.encrypted_value);
        self.store.update_secret(&record)?;

        tracing::info!(path, "secret updated");
        Ok(SecretSummary::from(&record))
    }

    /// All user secrets, oldest first. Nothing is decrypted, but the vault
    /// must still be unsealed.
    pub fn list_secrets(&self) -> Result<Vec<SecretSummary>, SecretsError> {
        self.ensure_unlocked()?;
        Ok(self
            .store
            .list_secrets()?
            .iter()
            .filter(|r| !r.path.starts_with(RESERVED_PATH_PREFIX))
            .map(SecretSummary::from)
            .collect())
    }

    pub fn delete_secret(&self, path: &str) -> Result<(), SecretsError> {
        validate_path(path)?;
        self.ensure_unlocked()?;
        self.store.delete_secret(path)?;
        tracing::info!(path, "secret deleted");
        Ok(())
    }

    /// The token-signing key minted together with the master key.
    pub fn signing_key(&self) -> Result<Zeroizing<Vec<u8>>, SecretsError> {
        self.read(SIGNING_KEY_PATH)
    }

    fn read(&self, path: &str) -> Result<Zeroizing<Vec<u8>>, SecretsError> {
        self.ensure_unlocked()?;
        let record = self
            .store
            .get_secret(path)?
            .ok_or_else(|| SecretsError::NotFound(path.to_string()))?;
        open_value(
            &self.key_manager,
            &record.encrypted_data_key,
            &record.encrypted_value,
        )
        .map_err(open_error)
    }

    fn ensure_unlocked(&self) -> Result<(), SecretsError> {
        match self.key_manager.state() {
            SealState::Unlocked => Ok(()),
            _ => Err(SecretsError::KeyLocked),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
