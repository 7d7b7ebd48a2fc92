// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path constants and utilities for the storage layout.

use std::path::{Path, PathBuf};

/// Default base directory for persisted state.
pub const DATA_ROOT: &str = "/data";

/// Namespace prefixed to every record key.
pub const RECORD_NAMESPACE: &str = "report_courier";

/// Storage path utilities.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding versioned records.
    pub fn records_dir(&self) -> PathBuf {
        self.root.join(".storage")
    }

    /// Namespaced key of a record, as written inside the record.
    pub fn record_key(&self, key: &str) -> String {
        format!("{RECORD_NAMESPACE}.{key}")
    }

    /// File holding the record `key`.
    pub fn record(&self, key: &str) -> PathBuf {
        self.records_dir().join(self.record_key(key))
    }

    /// Temp file a record is written to before being renamed into place.
    pub fn temp_record(&self, key: &str) -> PathBuf {
        self.records_dir().join(format!("{}.tmp", self.record_key(key)))
    }

    // ========== Host files collected into reports ==========

    /// Host log file.
    pub fn log_file(&self) -> PathBuf {
        self.root.join("home-assistant.log")
    }

    /// Saved automation traces.
    pub fn traces_file(&self) -> PathBuf {
        self.records_dir().join("trace.saved_traces")
    }
}
