//! # Key Manager
//!
//! The sealing state machine. One instance per running service, constructed
//! explicitly and shared as `Arc<KeyManager>` with everything that needs the
//! master key.
//!
//! ```text
//!                 configure_key_system
//!   Uninitialized ─────────────────────► Locked ◄──────────┐
//!        │                                 │               │ rollback_to_locked
//!        │ set_new_master_key              │ add_share     │
//!        │                                 │ (>= min)      │
//!        └───────────────────────────► Unlocked ───────────┘
//! ```
//!
//! The master key is stored *inside* the `Unlocked` variant, so "key present
//! iff unlocked" holds by construction. Every transition away from
//! `Unlocked` drops the key, and [`Zeroizing`] wipes it.
//!
//! ## Locking
//!
//! All state sits behind one `parking_lot::RwLock`. Mutations take the write
//! lock for their full duration; `state`, `status`, `get_master_key`,
//! `encrypt` and `decrypt` take the read lock. Each call is atomic with
//! respect to every other call.
//!
//! ## Verification
//!
//! Reconstruction only proves the shares are arithmetically consistent.
//! [`KeyManager::add_share_verified`] runs a caller-supplied check against
//! the candidate key *before* publishing it, while still holding the write
//! lock. [`KeyManager::add_share`] publishes immediately and leaves the caller
//! to call [`KeyManager::rollback_to_locked`] if a later check fails; between
//! those two calls any reader sees an unverified key.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::encryption::{self, EncryptionError};
use crate::crypto::shamir;

// ---------------------------------------------------------------------------
// Public Types
// ---------------------------------------------------------------------------

/// Externally visible seal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealState {
    /// No master key has ever been configured for this process.
    Uninitialized,
    /// A master key exists but is not in memory.
    Locked,
    /// The master key is in memory and usable.
    Unlocked,
}

/// Read-only snapshot returned by [`KeyManager::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealStatus {
    pub state: SealState,
    pub current_shares: usize,
    pub min_shares: usize,
    pub max_shares: usize,
}

/// Outcome of a successful share submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareAdded {
    /// Position of the share in the accumulated list. Positional only: a
    /// later removal shifts every share after it down by one.
    pub index: usize,
    /// Whether this submission reconstructed and adopted the master key.
    pub unlocked: bool,
}

/// Errors returned by the key manager.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyManagerError {
    #[error("no key system configured")]
    NotConfigured,

    #[error("invalid threshold: min_shares={min_shares}, max_shares={max_shares}")]
    InvalidThreshold { min_shares: usize, max_shares: usize },

    #[error("maximum number of shares reached ({0})")]
    MaxSharesReached(usize),

    #[error("could not recombine shares to unlock key: {0}")]
    CouldNotRecombine(String),

    #[error("reconstructed key failed verification")]
    VerificationFailed,

    #[error("master key is locked")]
    KeyLocked,

    #[error("master key is already unlocked")]
    AlreadyUnlocked,

    #[error(transparent)]
    Cipher(#[from] EncryptionError),
}

// ---------------------------------------------------------------------------
// Internal State
// ---------------------------------------------------------------------------

enum Seal {
    Uninitialized,
    Locked,
    Unlocked(Zeroizing<Vec<u8>>),
}

impl Seal {
    fn state(&self) -> SealState {
        match self {
            Seal::Uninitialized => SealState::Uninitialized,
            Seal::Locked => SealState::Locked,
            Seal::Unlocked(_) => SealState::Unlocked,
        }
    }
}

struct Inner {
    seal: Seal,
    shares: Vec<Zeroizing<Vec<u8>>>,
    min_shares: usize,
    max_shares: usize,
}

impl Inner {
    /// Append `share` and, when the threshold is met and the key is not
    /// already in memory, recombine everything accumulated so far.
    ///
    /// Returns the new index and the candidate key, if one was produced. A
    /// failed recombination pops the share again before returning.
    fn accumulate(
        &mut self,
        share: Vec<u8>,
    ) -> Result<(usize, Option<Zeroizing<Vec<u8>>>), KeyManagerError> {
        if matches!(self.seal, Seal::Uninitialized) {
            return Err(KeyManagerError::NotConfigured);
        }
        if self.shares.len() >= self.max_shares {
            return Err(KeyManagerError::MaxSharesReached(self.max_shares));
        }

        self.shares.push(Zeroizing::new(share));
        let index = self.shares.len() - 1;

        if self.shares.len() < self.min_shares || matches!(self.seal, Seal::Unlocked(_)) {
            tracing::debug!(
                index,
                current = self.shares.len(),
                min = self.min_shares,
                "share accumulated"
            );
            return Ok((index, None));
        }

        let parts: Vec<&[u8]> = self.shares.iter().map(|s| s.as_slice()).collect();
        match shamir::combine(&parts) {
            Ok(key) if !key.is_empty() => Ok((index, Some(key))),
            Ok(_) => {
                self.shares.pop();
                Err(KeyManagerError::CouldNotRecombine(
                    "no valid master key reconstructed".into(),
                ))
            }
            Err(e) => {
                self.shares.pop();
                Err(KeyManagerError::CouldNotRecombine(e.to_string()))
            }
        }
    }

    fn status(&self) -> SealStatus {
        SealStatus {
            state: self.seal.state(),
            current_shares: self.shares.len(),
            min_shares: self.min_shares,
            max_shares: self.max_shares,
        }
    }
}

fn validate_threshold(min_shares: usize, max_shares: usize) -> Result<(), KeyManagerError> {
    if min_shares == 0 || min_shares > max_shares {
        return Err(KeyManagerError::InvalidThreshold {
            min_shares,
            max_shares,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// KeyManager
// ---------------------------------------------------------------------------

/// Owner of the master key lifecycle.
pub struct KeyManager {
    inner: RwLock<Inner>,
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the key or the shares.
        f.debug_struct("KeyManager")
            .field("status", &self.status())
            .finish()
    }
}

impl KeyManager {
    /// A fresh manager in `Uninitialized`.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                seal: Seal::Uninitialized,
                shares: Vec::new(),
                min_shares: 0,
                max_shares: 0,
            }),
        }
    }

    /// Re-enter `Locked` with a previously chosen threshold.
    ///
    /// Used at startup when settings from an earlier run exist. Drops any
    /// accumulated shares and any key in memory.
    pub fn configure_key_system(
        &self,
        min_shares: usize,
        max_shares: usize,
    ) -> Result<(), KeyManagerError> {
        validate_threshold(min_shares, max_shares)?;

        let mut inner = self.inner.write();
        inner.min_shares = min_shares;
        inner.max_shares = max_shares;
        inner.shares.clear();
        inner.seal = Seal::Locked;

        tracing::info!(min_shares, max_shares, "key system configured, state=locked");
        Ok(())
    }

    /// Adopt a freshly minted master key and go straight to `Unlocked`.
    ///
    /// The caller already holds the whole key, so no shares are needed.
    pub fn set_new_master_key(
        &self,
        key: &[u8],
        min_shares: usize,
        max_shares: usize,
    ) -> Result<(), KeyManagerError> {
        validate_threshold(min_shares, max_shares)?;

        let mut inner = self.inner.write();
        inner.min_shares = min_shares;
        inner.max_shares = max_shares;
        inner.shares.clear();
        inner.seal = Seal::Unlocked(Zeroizing::new(key.to_vec()));

        tracing::info!(min_shares, max_shares, "new master key set, state=unlocked");
        Ok(())
    }

    /// Submit one share.
    ///
    /// Once at least `min_shares` are held, all of them are recombined and
    /// the result becomes the master key immediately. The key is *not*
    /// verified here. A failed recombination leaves the share count and state
    /// exactly as they were.
    pub fn add_share(&self, share: Vec<u8>) -> Result<ShareAdded, KeyManagerError> {
        let mut inner = self.inner.write();
        let (index, candidate) = inner.accumulate(share)?;

        let unlocked = match candidate {
            Some(key) => {
                inner.seal = Seal::Unlocked(key);
                tracing::info!(shares = inner.shares.len(), "master key reconstructed, state=unlocked");
                true
            }
            None => false,
        };
        Ok(ShareAdded { index, unlocked })
    }

    /// Submit one share, publishing a reconstructed key only if `verify`
    /// accepts it.
    ///
    /// `verify` runs under the write lock, so it must not block on I/O:
    /// fetch whatever it needs first. When it rejects the candidate, the
    /// share is removed again, the state stays `Locked`, and
    /// [`KeyManagerError::VerificationFailed`] is returned.
    ///
    /// Unlike [`KeyManager::add_share`], this refuses shares once the key is
    /// in memory ([`KeyManagerError::AlreadyUnlocked`]); the check happens
    /// under the same lock as the append.
    pub fn add_share_verified<F>(
        &self,
        share: Vec<u8>,
        verify: F,
    ) -> Result<ShareAdded, KeyManagerError>
    where
        F: FnOnce(&[u8]) -> bool,
    {
        let mut inner = self.inner.write();
        if matches!(inner.seal, Seal::Unlocked(_)) {
            return Err(KeyManagerError::AlreadyUnlocked);
        }
        let (index, candidate) = inner.accumulate(share)?;

        let Some(key) = candidate else {
            return Ok(ShareAdded {
                index,
                unlocked: false,
            });
        };

        if !verify(&key) {
            inner.shares.pop();
            tracing::warn!(
                shares = inner.shares.len(),
                "reconstructed key rejected by verification, state=locked"
            );
            return Err(KeyManagerError::VerificationFailed);
        }

        inner.seal = Seal::Unlocked(key);
        tracing::info!(shares = inner.shares.len(), "master key reconstructed and verified, state=unlocked");
        Ok(ShareAdded {
            index,
            unlocked: true,
        })
    }

    /// Remove the share at `index`, shifting later shares down by one.
    ///
    /// Returns `false` (and changes nothing) when `index` is out of range.
    pub fn remove_share(&self, index: usize) -> bool {
        let mut inner = self.inner.write();
        if index >= inner.shares.len() {
            return false;
        }
        inner.shares.remove(index);
        tracing::debug!(index, remaining = inner.shares.len(), "share removed");
        true
    }

    /// A copy of the master key. Fails with `KeyLocked` unless unlocked.
    pub fn get_master_key(&self) -> Result<Zeroizing<Vec<u8>>, KeyManagerError> {
        match &self.inner.read().seal {
            Seal::Unlocked(key) => Ok(key.clone()),
            _ => Err(KeyManagerError::KeyLocked),
        }
    }

    pub fn state(&self) -> SealState {
        self.inner.read().seal.state()
    }

    pub fn status(&self) -> SealStatus {
        self.inner.read().status()
    }

    /// Drop the master key and go back to `Locked`.
    ///
    /// Accumulated shares are left alone: the same set will reconstruct the
    /// same key on the next submission until one of them is removed.
    pub fn rollback_to_locked(&self) {
        let mut inner = self.inner.write();
        inner.seal = Seal::Locked;
        tracing::warn!(shares = inner.shares.len(), "rolled back to locked");
    }

    /// Forget everything: key, shares, and threshold.
    ///
    /// Undoes a `set_new_master_key` whose surrounding creation failed.
    pub fn rollback_to_uninitialized(&self) {
        let mut inner = self.inner.write();
        inner.seal = Seal::Uninitialized;
        inner.shares.clear();
        inner.min_shares = 0;
        inner.max_shares = 0;
        tracing::warn!("rolled back to uninitialized");
    }

    /// Encrypt under the master key without copying it out.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyManagerError> {
        match &self.inner.read().seal {
            Seal::Unlocked(key) => Ok(encryption::encrypt(key, plaintext)?),
            _ => Err(KeyManagerError::KeyLocked),
        }
    }

    /// Decrypt under the master key without copying it out.
    pub fn decrypt(&self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, KeyManagerError> {
        match &self.inner.read().seal {
            Seal::Unlocked(key) => Ok(Zeroizing::new(encryption::decrypt(key, data)?)),
            _ => Err(KeyManagerError::KeyLocked),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
