//! # Storage Module
//!
//! Persistence for everything keyseal keeps on disk: the settings written
//! when a master key is minted, and the envelope-encrypted secret records.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs    — SettingsStore / SecretStore traits, StoreError
//! models.rs — SecretRecord (what a secret looks like at rest)
//! db.rs     — VaultDB, the sled implementation of both traits
//! ```
//!
//! The services above this layer only see the traits, injected as
//! `Arc<dyn SettingsStore>` / `Arc<dyn SecretStore>`. Nothing stored here is
//! plaintext secret material: settings hold share counts and the checksum
//! ciphertext, records hold ciphertexts only.

pub mod db;
pub mod models;

use std::collections::HashMap;

pub use db::VaultDB;
pub use models::SecretRecord;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors returned by both stores.
///
/// `NotFound` and `AlreadyExists` drive control flow; everything else is an
/// I/O or encoding failure and is fatal to the current request.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Repository Traits
// ---------------------------------------------------------------------------

/// Global key/value settings.
pub trait SettingsStore: Send + Sync {
    /// A single setting, or `None` if it was never stored.
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;

    /// Several settings at once. `None` unless *every* key is present.
    fn get_settings(&self, keys: &[&str]) -> StoreResult<Option<HashMap<String, String>>>;

    fn store_setting(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Store all pairs in one atomic batch.
    fn store_settings(&self, settings: &[(&str, String)]) -> StoreResult<()>;

    /// Fails with `NotFound` if the key does not exist.
    fn delete_setting(&self, key: &str) -> StoreResult<()>;

    /// Fails with `NotFound` if none of the keys exist.
    fn delete_settings(&self, keys: &[&str]) -> StoreResult<()>;
}

/// Encrypted secret records, keyed by path.
pub trait SecretStore: Send + Sync {
    /// Fails with `AlreadyExists` if a record with the same path exists.
    /// The check and the insert are one atomic step.
    fn create_secret(&self, record: &SecretRecord) -> StoreResult<()>;

    fn get_secret(&self, path: &str) -> StoreResult<Option<SecretRecord>>;

    /// Replace the record at `record.path`. Fails with `NotFound` if absent.
    fn update_secret(&self, record: &SecretRecord) -> StoreResult<()>;

    /// All records, oldest first.
    fn list_secrets(&self) -> StoreResult<Vec<SecretRecord>>;

    /// Fails with `NotFound` if absent.
    fn delete_secret(&self, path: &str) -> StoreResult<()>;
}
