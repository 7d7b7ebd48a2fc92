// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Versioned JSON blob store.
//!
//! Every record lives in its own file under `.storage/`:
//!
//! ```text
//! {
//!   "version": 6,
//!   "key": "report_courier.credentials",
//!   "data": { ... }
//! }
//! ```
//!
//! Writes go to a temp file that is renamed over the target, so readers
//! never observe a half-written record. A missing record loads as an empty
//! map.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::StoragePaths;

/// Current on-disk record version.
pub const STORAGE_VERSION: u32 = 6;

/// Error type for record storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error during file operations
    Io(io::Error),
    /// JSON serialization/deserialization error
    Json(serde_json::Error),
    /// Storage directory not created yet
    NotInitialized,
    /// Record exists but does not have the expected shape
    Corrupted { key: String, reason: String },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {e}"),
            StorageError::Json(e) => write!(f, "JSON error: {e}"),
            StorageError::NotInitialized => write!(f, "Storage not initialized"),
            StorageError::Corrupted { key, reason } => {
                write!(f, "Corrupted record {key}: {reason}")
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        StorageError::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Json(e)
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    version: u32,
    key: String,
    data: Map<String, Value>,
}

/// File-backed store of versioned JSON records.
#[derive(Debug, Clone)]
pub struct JsonStore {
    paths: StoragePaths,
    initialized: bool,
}

impl JsonStore {
    /// Does NOT create the directory structure. Call `initialize()` first.
    pub fn new(paths: StoragePaths) -> Self {
        Self {
            paths,
            initialized: false,
        }
    }

    /// Create and initialize a store rooted at `paths`.
    pub fn open(paths: StoragePaths) -> StorageResult<Self> {
        let mut store = Self::new(paths);
        store.initialize()?;
        Ok(store)
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Create the record directory. Safe to call multiple times.
    pub fn initialize(&mut self) -> StorageResult<()> {
        fs::create_dir_all(self.paths.records_dir())?;
        self.initialized = true;
        Ok(())
    }

    /// Load a record's data, or an empty map when it does not exist.
    pub fn load(&self, key: &str) -> StorageResult<Map<String, Value>> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        let path = self.paths.record(key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };

        let record: StoredRecord = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            StorageError::Corrupted {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        if record.version > STORAGE_VERSION {
            warn!(
                key = %key,
                version = record.version,
                supported = STORAGE_VERSION,
                "Record written by a newer version"
            );
        }
        Ok(record.data)
    }

    /// Replace a record. Returns `false` when the stored content was already equal.
    pub fn save(&self, key: &str, data: &Map<String, Value>) -> StorageResult<bool> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        if self.exists(key) && &self.load(key)? == data {
            debug!(key = %key, "Record unchanged, skipping write");
            return Ok(false);
        }

        let path = self.paths.record(key);
        let record = StoredRecord {
            version: STORAGE_VERSION,
            key: self.paths.record_key(key),
            data: data.clone(),
        };

        // Write to temp file first, then rename for atomicity
        let temp_path = self.paths.temp_record(key);
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &record)?;
            writer.flush()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(true)
    }

    /// Delete a record. Deleting a missing record is not an error.
    pub fn remove(&self, key: &str) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        match fs::remove_file(self.paths.record(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a record file exists.
    pub fn exists(&self, key: &str) -> bool {
        File::open(self.paths.record(key)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(StoragePaths::new(dir.path())).unwrap();
        (dir, store)
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_record_loads_as_empty_map() {
        let (_dir, store) = test_store();
        assert!(store.load("credentials").unwrap().is_empty());
        assert!(!store.exists("credentials"));
    }

    #[test]
    fn save_then_load_round_trips_with_version_envelope() {
        let (_dir, store) = test_store();
        let data = map(json!({"pinata_public": "pk", "pinata_secret": "sk"}));

        assert!(store.save("credentials", &data).unwrap());
        assert_eq!(store.load("credentials").unwrap(), data);

        let raw = fs::read_to_string(store.paths().record("credentials")).unwrap();
        let on_disk: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk["version"], json!(STORAGE_VERSION));
        assert_eq!(on_disk["key"], json!("report_courier.credentials"));
        assert_eq!(on_disk["data"]["pinata_public"], json!("pk"));
        assert!(!store.paths().temp_record("credentials").exists());
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let (_dir, store) = test_store();
        let data = map(json!({"a": 1}));
        assert!(store.save("k", &data).unwrap());
        assert!(!store.save("k", &data).unwrap());
        assert!(store.save("k", &map(json!({"a": 2}))).unwrap());
    }

    #[test]
    fn remove_deletes_and_tolerates_missing() {
        let (_dir, store) = test_store();
        store.save("k", &map(json!({"a": 1}))).unwrap();
        store.remove("k").unwrap();
        assert!(!store.exists("k"));
        store.remove("k").unwrap();
        assert!(store.load("k").unwrap().is_empty());
    }

    #[test]
    fn corrupted_record_is_reported() {
        let (_dir, store) = test_store();
        fs::write(store.paths().record("k"), b"{not json").unwrap();
        assert!(matches!(
            store.load("k"),
            Err(StorageError::Corrupted { key, .. }) if key == "k"
        ));
    }

    #[test]
    fn uninitialized_store_returns_error() {
        let store = JsonStore::new(StoragePaths::new("/tmp/never-init"));
        assert!(matches!(store.load("k"), Err(StorageError::NotInitialized)));
    }
}
