// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository for the device account (seed and owner details).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::{JsonStore, StorageError, StorageResult};
use crate::keys::KeyRing;

/// Record key of the account blob.
pub const ACCOUNT_KEY: &str = "account";

/// Persisted device account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Seed of the device account (mnemonic or `0x` hex).
    pub sender_seed: String,
    /// Identity token sent to the integrator at registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    /// Owner of the ledger subscription, when the device is delegated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("sender_seed", &"<redacted>")
            .field("owner_email", &self.owner_email)
            .field("owner_address", &self.owner_address)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl AccountRecord {
    pub fn keyring(&self) -> Result<KeyRing, crate::keys::KeyError> {
        KeyRing::from_seed(&self.sender_seed)
    }
}

/// Repository over the `account` record.
pub struct AccountRepository<'a> {
    store: &'a JsonStore,
}

impl<'a> AccountRepository<'a> {
    pub fn new(store: &'a JsonStore) -> Self {
        Self { store }
    }

    pub fn get(&self) -> StorageResult<Option<AccountRecord>> {
        let data = self.store.load(ACCOUNT_KEY)?;
        if data.is_empty() {
            return Ok(None);
        }
        serde_json::from_value(data.into())
            .map(Some)
            .map_err(|e| StorageError::Corrupted {
                key: ACCOUNT_KEY.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn save(&self, record: &AccountRecord) -> StorageResult<()> {
        let value = serde_json::to_value(record)?;
        let data = value.as_object().cloned().ok_or_else(|| StorageError::Corrupted {
            key: ACCOUNT_KEY.to_string(),
            reason: "account record is not an object".to_string(),
        })?;
        self.store.save(ACCOUNT_KEY, &data)?;
        Ok(())
    }

    /// Return the stored account, creating one with a fresh seed if missing.
    pub fn bootstrap(&self, owner_email: Option<String>) -> StorageResult<AccountRecord> {
        if let Some(existing) = self.get()? {
            return Ok(existing);
        }

        let keyring = KeyRing::generate().map_err(|e| StorageError::Corrupted {
            key: ACCOUNT_KEY.to_string(),
            reason: format!("seed generation failed: {e}"),
        })?;
        let record = AccountRecord {
            sender_seed: keyring.phrase().to_string(),
            owner_email,
            owner_address: None,
            created_at: Utc::now(),
        };
        self.save(&record)?;
        Ok(record)
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.store.remove(ACCOUNT_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;

    fn test_store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(StoragePaths::new(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let (_dir, store) = test_store();
        let repo = AccountRepository::new(&store);
        assert_eq!(repo.get().unwrap(), None);

        let first = repo.bootstrap(Some("owner@example.com".into())).unwrap();
        let second = repo.bootstrap(None).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.owner_email.as_deref(), Some("owner@example.com"));

        let keyring = first.keyring().unwrap();
        assert_eq!(keyring.phrase(), first.sender_seed);
    }

    #[test]
    fn saved_record_round_trips() {
        let (_dir, store) = test_store();
        let repo = AccountRepository::new(&store);
        let record = AccountRecord {
            sender_seed: format!("0x{}", "ab".repeat(32)),
            owner_email: None,
            owner_address: Some("4HifM6Cny7bHAdLb5jw3hHV2KabuzRZV8gmHG1eh4PxJakwi".into()),
            created_at: Utc::now(),
        };
        repo.save(&record).unwrap();
        assert_eq!(repo.get().unwrap(), Some(record));

        repo.clear().unwrap();
        assert_eq!(repo.get().unwrap(), None);
    }

    #[test]
    fn debug_hides_seed() {
        let record = AccountRecord {
            sender_seed: "secret words".into(),
            owner_email: None,
            owner_address: None,
            created_at: Utc::now(),
        };
        assert!(!format!("{record:?}").contains("secret words"));
    }
}
