//! # Key Management Protocol
//!
//! Drives the [`KeyManager`] through its lifecycle and keeps it consistent
//! with the persisted settings (threshold + checksum). Four operations:
//!
//! | Operation           | Effect                                             |
//! |---------------------|----------------------------------------------------|
//! | `create_master_key` | mint, checksum, split, persist, unlock             |
//! | `get_key_status`    | snapshot of the seal                               |
//! | `add_share`         | accumulate; at threshold reconstruct *and verify*  |
//! | `delete_share`      | drop a share by position                           |
//!
//! ## Verification
//!
//! A reconstruction only counts if the resulting key decrypts the persisted
//! checksum back to [`CHECKSUM_PLAINTEXT`]. The checksum is read from the
//! settings store *before* the share is handed to the key manager, and the
//! comparison runs inside [`KeyManager::add_share_verified`]. A key that
//! fails the check is never published, so no concurrent reader can pick it
//! up.
//!
//! ## Creation rollback
//!
//! Creation writes settings, unlocks the manager, and stores the signing key.
//! If any step after the settings write fails, the manager goes back to
//! `Uninitialized` and the settings are deleted again.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::manager::{KeyManager, KeyManagerError, SealState, ShareAdded};
use crate::config::{
    CHECKSUM_PLAINTEXT, KEY_SETTINGS, MAX_TOTAL_SHARES, SETTING_MASTER_KEY_CHECKSUM,
    SETTING_MIN_SHARES, SETTING_TOTAL_SHARES, SIGNING_KEY_LENGTH, SIGNING_KEY_PATH,
};
use crate::crypto::encryption::{self, decode_base64, encode_base64, generate_key};
use crate::crypto::shamir;
use crate::secrets::envelope::seal_value;
use crate::storage::{SecretRecord, SecretStore, SettingsStore, StoreError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Errors returned by [`KeyManagementService`].
#[derive(Debug, Error)]
pub enum KeyManagementError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("master key already exists")]
    KeyAlreadyExists,

    #[error("no master key has been set")]
    NoKeySet,

    #[error("master key is already unlocked")]
    KeyAlreadyUnlocked,

    #[error("too many shares submitted")]
    TooManyShares,

    #[error("could not recombine shares: {0}")]
    CouldNotRecombine(String),

    #[error("shares do not reconstruct the master key")]
    WrongShares,

    #[error("share index out of range")]
    WrongIndex,

    #[error("share is not valid base64: {0}")]
    InvalidShareEncoding(String),

    #[error("persisted key settings are corrupt: {0}")]
    CorruptSettings(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<KeyManagerError> for KeyManagementError {
    fn from(e: KeyManagerError) -> Self {
        match e {
            KeyManagerError::NotConfigured => KeyManagementError::NoKeySet,
            KeyManagerError::MaxSharesReached(_) => KeyManagementError::TooManyShares,
            KeyManagerError::CouldNotRecombine(msg) => KeyManagementError::CouldNotRecombine(msg),
            KeyManagerError::VerificationFailed => KeyManagementError::WrongShares,
            KeyManagerError::AlreadyUnlocked => KeyManagementError::KeyAlreadyUnlocked,
            KeyManagerError::InvalidThreshold {
                min_shares,
                max_shares,
            } => KeyManagementError::InvalidParameters(format!(
                "min_shares={min_shares}, total_shares={max_shares}"
            )),
            other @ (KeyManagerError::KeyLocked | KeyManagerError::Cipher(_)) => {
                KeyManagementError::Internal(other.to_string())
            }
        }
    }
}

/// Result of [`KeyManagementService::get_key_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStatus {
    pub is_locked: bool,
    pub current_shares: usize,
    pub min_shares: usize,
    pub total_shares: usize,
}

// ---------------------------------------------------------------------------
// KeyManagementService
// ---------------------------------------------------------------------------

pub struct KeyManagementService {
    key_manager: Arc<KeyManager>,
    settings: Arc<dyn SettingsStore>,
    secrets: Arc<dyn SecretStore>,
    /// Serializes `create_master_key` so two callers cannot both pass the
    /// "no checksum yet" check.
    create_lock: Mutex<()>,
}

impl KeyManagementService {
    /// Build the service and restore the seal from persisted settings.
    ///
    /// With all three key settings present the manager is configured and
    /// left `Locked`. With none present it stays `Uninitialized`. Anything
    /// in between, or values that don't parse, is `CorruptSettings`.
    pub fn new(
        key_manager: Arc<KeyManager>,
        settings: Arc<dyn SettingsStore>,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self, KeyManagementError> {
        let service = Self {
            key_manager,
            settings,
            secrets,
            create_lock: Mutex::new(()),
        };
        service.restore()?;
        Ok(service)
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.key_manager
    }

    fn restore(&self) -> Result<(), KeyManagementError> {
        match self.settings.get_settings(&KEY_SETTINGS)? {
            Some(values) => {
                let total = parse_count(&values, SETTING_TOTAL_SHARES)?;
                let min = parse_count(&values, SETTING_MIN_SHARES)?;
                self.key_manager
                    .configure_key_system(min, total)
                    .map_err(|e| KeyManagementError::CorruptSettings(e.to_string()))?;
                tracing::info!(min, total, "restored key settings, vault is sealed");
                Ok(())
            }
            None => {
                for key in KEY_SETTINGS {
                    if self.settings.get_setting(key)?.is_some() {
                        return Err(KeyManagementError::CorruptSettings(format!(
                            "only some key settings are present (found {key})"
                        )));
                    }
                }
                tracing::info!("no master key configured yet");
                Ok(())
            }
        }
    }

    /// Mint a new master key and return its shares, base64-encoded.
    ///
    /// The shares are returned exactly once and never stored.
    pub fn create_master_key(
        &self,
        total_shares: usize,
        min_shares: usize,
    ) -> Result<Vec<String>, KeyManagementError> {
        if min_shares == 0 || total_shares == 0 || min_shares > total_shares {
            return Err(KeyManagementError::InvalidParameters(format!(
                "need 0 < min_shares <= total_shares, got min_shares={min_shares}, total_shares={total_shares}"
            )));
        }
        if total_shares > MAX_TOTAL_SHARES {
            return Err(KeyManagementError::InvalidParameters(format!(
                "total_shares must be at most {MAX_TOTAL_SHARES}, got {total_shares}"
            )));
        }

        let _guard = self.create_lock.lock();

        if self.settings.get_setting(SETTING_MASTER_KEY_CHECKSUM)?.is_some() {
            return Err(KeyManagementError::KeyAlreadyExists);
        }

        let master_key = generate_key();
        let checksum = encryption::encrypt(&master_key, CHECKSUM_PLAINTEXT)
            .map_err(|e| KeyManagementError::Internal(e.to_string()))?;
        let shares = shamir::split(&master_key, total_shares, min_shares)
            .map_err(|e| KeyManagementError::Internal(e.to_string()))?;

        self.settings.store_settings(&[
            (SETTING_TOTAL_SHARES, total_shares.to_string()),
            (SETTING_MIN_SHARES, min_shares.to_string()),
            (SETTING_MASTER_KEY_CHECKSUM, encode_base64(&checksum)),
        ])?;

        if let Err(e) = self
            .key_manager
            .set_new_master_key(&master_key, min_shares, total_shares)
            .map_err(KeyManagementError::from)
            .and_then(|()| self.store_signing_key())
        {
            return Err(self.rollback_creation(e));
        }

        tracing::info!(total_shares, min_shares, "master key created");
        Ok(shares.iter().map(|s| encode_base64(s)).collect())
    }

    /// Mint the signing key and store it as an ordinary envelope-encrypted
    /// secret. A record left behind by an earlier master key is overwritten;
    /// it could never be decrypted again anyway.
    fn store_signing_key(&self) -> Result<(), KeyManagementError> {
        let signing_key = generate_key();
        debug_assert_eq!(signing_key.len(), SIGNING_KEY_LENGTH);

        let sealed = seal_value(&self.key_manager, &signing_key)?;
        let record = SecretRecord::new(
            SIGNING_KEY_PATH,
            sealed.encrypted_data_key,
            sealed.encrypted_value,
        );
        match self.secrets.create_secret(&record) {
            Err(StoreError::AlreadyExists(_)) => {
                tracing::warn!("replacing stale signing key");
                self.secrets.update_secret(&record)?;
                Ok(())
            }
            other => Ok(other?),
        }
    }

    fn rollback_creation(&self, cause: KeyManagementError) -> KeyManagementError {
        tracing::error!(error = %cause, "master key creation failed, rolling back");
        self.key_manager.rollback_to_uninitialized();
        match self.settings.delete_settings(&KEY_SETTINGS) {
            Ok(()) => cause,
            Err(cleanup) => KeyManagementError::Internal(format!(
                "{cause}; rollback also failed: {cleanup}"
            )),
        }
    }

    pub fn get_key_status(&self) -> Result<KeyStatus, KeyManagementError> {
        if self.settings.get_setting(SETTING_MASTER_KEY_CHECKSUM)?.is_none() {
            return Err(KeyManagementError::NoKeySet);
        }
        let status = self.key_manager.status();
        Ok(KeyStatus {
            is_locked: status.state != SealState::Unlocked,
            current_shares: status.current_shares,
            min_shares: status.min_shares,
            total_shares: status.max_shares,
        })
    }

    /// Submit one base64-encoded share.
    ///
    /// Returns `unlocked: true` only once the reconstructed key has been
    /// checked against the persisted checksum and adopted.
    pub fn add_share(&self, encoded_share: &str) -> Result<ShareAdded, KeyManagementError> {
        self.ensure_locked()?;

        let share = decode_base64(encoded_share)
            .map_err(|e| KeyManagementError::InvalidShareEncoding(e.to_string()))?;

        let checksum = self
            .settings
            .get_setting(SETTING_MASTER_KEY_CHECKSUM)?
            .ok_or(KeyManagementError::NoKeySet)?;
        // An undecodable checksum can never verify; let the check fail.
        let checksum = decode_base64(&checksum).ok();

        let added = self.key_manager.add_share_verified(share, |candidate| {
            checksum
                .as_deref()
                .and_then(|c| encryption::decrypt(candidate, c).ok())
                .is_some_and(|plaintext| plaintext == CHECKSUM_PLAINTEXT)
        })?;

        if added.unlocked {
            tracing::info!(index = added.index, "vault unsealed");
        }
        Ok(added)
    }

    /// Remove the share at `index` (positional; later shares shift down).
    pub fn delete_share(&self, index: usize) -> Result<(), KeyManagementError> {
        self.ensure_locked()?;
        if !self.key_manager.remove_share(index) {
            return Err(KeyManagementError::WrongIndex);
        }
        Ok(())
    }

    fn ensure_locked(&self) -> Result<(), KeyManagementError> {
        match self.key_manager.state() {
            SealState::Uninitialized => Err(KeyManagementError::NoKeySet),
            SealState::Unlocked => Err(KeyManagementError::KeyAlreadyUnlocked),
            SealState::Locked => Ok(()),
        }
    }
}

fn parse_count(
    values: &std::collections::HashMap<String, String>,
    key: &str,
) -> Result<usize, KeyManagementError> {
    let raw = values
        .get(key)
        .ok_or_else(|| KeyManagementError::CorruptSettings(format!("{key} missing")))?;
    raw.trim()
        .parse()
        .map_err(|_| KeyManagementError::CorruptSettings(format!("{key}={raw:?} is not a count")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
