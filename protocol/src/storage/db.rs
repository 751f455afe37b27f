//! # VaultDB — Persistent Storage Engine
//!
//! The persistence layer for keyseal, built on sled's embedded key-value
//! store. Implements both [`SettingsStore`] and [`SecretStore`].
//!
//! ## Tree Layout
//!
//! | Tree       | Key            | Value                  |
//! |------------|----------------|------------------------|
//! | `settings` | name (UTF-8)   | value (UTF-8)          |
//! | `secrets`  | path (UTF-8)   | `bincode(SecretRecord)`|
//!
//! ## Atomicity
//!
//! Creating a secret is a single `compare_and_swap` against "absent", so two
//! concurrent creates of the same path cannot both succeed. Updates swap
//! against the exact bytes just read and retry on conflict, so an update
//! never resurrects a concurrently deleted record. Multi-key settings writes
//! go through one `Batch`. Every write is flushed before it returns: a
//! secret store that loses an acknowledged write has lost a secret.

use sled::{Batch, Db, Tree};
use std::collections::HashMap;
use std::path::Path;

use super::models::SecretRecord;
use super::{SecretStore, SettingsStore, StoreError, StoreResult};

// ---------------------------------------------------------------------------
// VaultDB
// ---------------------------------------------------------------------------

/// sled-backed store for settings and secret records.
///
/// # Thread Safety
///
/// sled trees support lock-free concurrent reads and serialized writes.
/// `VaultDB` is cheap to clone and can be shared as `Arc<VaultDB>`.
#[derive(Debug, Clone)]
pub struct VaultDB {
    db: Db,
    settings: Tree,
    secrets: Tree,
}

impl VaultDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that lives in memory and disappears on drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let settings = db.open_tree("settings")?;
        let secrets = db.open_tree("secrets")?;
        Ok(Self {
            db,
            settings,
            secrets,
        })
    }

    /// Number of stored secret records, reserved paths included.
    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_setting(bytes: &[u8]) -> StoreResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode_record(record: &SecretRecord) -> StoreResult<Vec<u8>> {
    bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_record(bytes: &[u8]) -> StoreResult<SecretRecord> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

// -- Settings ---------------------------------------------------------------

impl SettingsStore for VaultDB {
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        match self.settings.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_setting(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_settings(&self, keys: &[&str]) -> StoreResult<Option<HashMap<String, String>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            match self.get_setting(key)? {
                Some(value) => {
                    found.insert((*key).to_string(), value);
                }
                None => return Ok(None),
            }
        }
        Ok(Some(found))
    }

    fn store_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.settings.insert(key.as_bytes(), value.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn store_settings(&self, settings: &[(&str, String)]) -> StoreResult<()> {
        let mut batch = Batch::default();
        for (key, value) in settings {
            batch.insert(key.as_bytes(), value.as_bytes());
        }
        self.settings.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    fn delete_setting(&self, key: &str) -> StoreResult<()> {
        match self.settings.remove(key.as_bytes())? {
            Some(_) => {
                self.db.flush()?;
                Ok(())
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    fn delete_settings(&self, keys: &[&str]) -> StoreResult<()> {
        let mut present = 0usize;
        let mut batch = Batch::default();
        for key in keys {
            if self.settings.contains_key(key.as_bytes())? {
                present += 1;
            }
            batch.remove(key.as_bytes());
        }
        if present == 0 {
            return Err(StoreError::NotFound(keys.join(",")));
        }
        self.settings.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }
}

// -- Secrets ----------------------------------------------------------------

impl SecretStore for VaultDB {
    fn create_secret(&self, record: &SecretRecord) -> StoreResult<()> {
        let bytes = encode_record(record)?;
        match self
            .secrets
            .compare_and_swap(record.path.as_bytes(), None as Option<&[u8]>, Some(bytes))?
        {
            Ok(()) => {
                self.db.flush()?;
                Ok(())
            }
            Err(_) => Err(StoreError::AlreadyExists(record.path.clone())),
        }
    }

    fn get_secret(&self, path: &str) -> StoreResult<Option<SecretRecord>> {
        match self.secrets.get(path.as_bytes())? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    fn update_secret(&self, record: &SecretRecord) -> StoreResult<()> {
        let bytes = encode_record(record)?;
        loop {
            let Some(current) = self.secrets.get(record.path.as_bytes())? else {
                return Err(StoreError::NotFound(record.path.clone()));
            };
            match self
                .secrets
                .compare_and_swap(record.path.as_bytes(), Some(current), Some(bytes.clone()))?
            {
                Ok(()) => {
                    self.db.flush()?;
                    return Ok(());
                }
                // Lost a race with another writer; re-read and try again.
                Err(_) => continue,
            }
        }
    }

    fn list_secrets(&self) -> StoreResult<Vec<SecretRecord>> {
        let mut records = Vec::with_capacity(self.secrets.len());
        for entry in self.secrets.iter() {
            let (_path, value) = entry?;
            records.push(decode_record(&value)?);
        }
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(records)
    }

    fn delete_secret(&self, path: &str) -> StoreResult<()> {
        match self.secrets.remove(path.as_bytes())? {
            Some(_) => {
                self.db.flush()?;
                Ok(())
            }
            None => Err(StoreError::NotFound(path.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, created_at: u64) -> SecretRecord {
        let mut r = SecretRecord::new(path, vec![1, 2, 3], vec![4, 5, 6]);
        r.created_at = created_at;
        r.updated_at = created_at;
        r
    }

    #[test]
    fn open_temporary_database() {
        let db = VaultDB::open_temporary().expect("should create temp db");
        assert_eq!(db.secret_count(), 0);
        assert!(db.get_setting("min_shares").unwrap().is_none());
    }

    #[test]
    fn open_persistent_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = VaultDB::open(dir.path()).expect("should open db");
        db.store_setting("min_shares", "3").unwrap();
        db.create_secret(&record("/a", 1)).unwrap();
        db.flush().unwrap();
        drop(db);

        let db2 = VaultDB::open(dir.path()).expect("should reopen db");
        assert_eq!(db2.get_setting("min_shares").unwrap().as_deref(), Some("3"));
        assert!(db2.get_secret("/a").unwrap().is_some());
    }

    #[test]
    fn setting_crud() {
        let db = VaultDB::open_temporary().unwrap();
        db.store_setting("total_shares", "5").unwrap();
        assert_eq!(db.get_setting("total_shares").unwrap().as_deref(), Some("5"));

        db.store_setting("total_shares", "7").unwrap();
        assert_eq!(db.get_setting("total_shares").unwrap().as_deref(), Some("7"));

        db.delete_setting("total_shares").unwrap();
        assert!(db.get_setting("total_shares").unwrap().is_none());
        assert!(matches!(
            db.delete_setting("total_shares"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn get_settings_requires_every_key() {
        let db = VaultDB::open_temporary().unwrap();
        db.store_settings(&[("a", "1".to_string()), ("b", "2".to_string())])
            .unwrap();

        let both = db.get_settings(&["a", "b"]).unwrap().expect("both present");
        assert_eq!(both["a"], "1");
        assert_eq!(both["b"], "2");

        assert!(db.get_settings(&["a", "b", "c"]).unwrap().is_none());
    }

    #[test]
    fn delete_settings_reports_not_found_only_when_nothing_deleted() {
        let db = VaultDB::open_temporary().unwrap();
        assert!(matches!(
            db.delete_settings(&["x", "y"]),
            Err(StoreError::NotFound(_))
        ));

        db.store_setting("x", "1").unwrap();
        db.delete_settings(&["x", "y"]).unwrap();
        assert!(db.get_setting("x").unwrap().is_none());
    }

    #[test]
    fn create_rejects_duplicate_path() {
        let db = VaultDB::open_temporary().unwrap();
        db.create_secret(&record("/dup", 1)).unwrap();
        assert!(matches!(
            db.create_secret(&record("/dup", 2)),
            Err(StoreError::AlreadyExists(path)) if path == "/dup"
        ));
        assert_eq!(db.secret_count(), 1);
        assert_eq!(db.get_secret("/dup").unwrap().unwrap().created_at, 1);
    }

    #[test]
    fn update_requires_existing_record() {
        let db = VaultDB::open_temporary().unwrap();
        let original = record("/svc/key", 10);
        assert!(matches!(
            db.update_secret(&original),
            Err(StoreError::NotFound(_))
        ));

        db.create_secret(&original).unwrap();
        let updated = original.reencrypted(vec![9], vec![9, 9]);
        db.update_secret(&updated).unwrap();

        let stored = db.get_secret("/svc/key").unwrap().unwrap();
        assert_eq!(stored.encrypted_value, vec![9, 9]);
        assert_eq!(stored.id, original.id);
    }

    #[test]
    fn list_is_ordered_by_creation_time() {
        let db = VaultDB::open_temporary().unwrap();
        db.create_secret(&record("/z", 1)).unwrap();
        db.create_secret(&record("/a", 3)).unwrap();
        db.create_secret(&record("/m", 2)).unwrap();

        let paths: Vec<_> = db
            .list_secrets()
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["/z", "/m", "/a"]);
    }

    #[test]
    fn delete_secret_then_missing() {
        let db = VaultDB::open_temporary().unwrap();
        db.create_secret(&record("/gone", 1)).unwrap();
        db.delete_secret("/gone").unwrap();
        assert!(db.get_secret("/gone").unwrap().is_none());
        assert!(matches!(
            db.delete_secret("/gone"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_creates_of_same_path_admit_one_winner() {
        use std::sync::Arc;
        use std::thread;

        let db = Arc::new(VaultDB::open_temporary().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = Arc::clone(&db);
                thread::spawn(move || db.create_secret(&record("/race", i)).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("writer thread should not panic"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn corrupt_record_is_a_serialization_error() {
        let db = VaultDB::open_temporary().unwrap();
        db.secrets.insert(b"/bad", &[0xFF, 0x00][..]).unwrap();
        assert!(matches!(
            db.get_secret("/bad"),
            Err(StoreError::Serialization(_))
        ));
    }
}
