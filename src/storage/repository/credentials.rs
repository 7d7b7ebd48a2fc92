// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository for pinning credentials obtained at registration.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::super::{JsonStore, StorageError, StorageResult};
use crate::keys::Address;

/// Record key of the credentials blob.
pub const CREDENTIALS_KEY: &str = "credentials";

const PUBLIC_FIELD: &str = "pinata_public";
const SECRET_FIELD: &str = "pinata_secret";
const INTEGRATOR_FIELD: &str = "integrator_address";

/// API key pair for the pinning backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinCredentials {
    pub public: String,
    pub secret: String,
}

impl fmt::Debug for PinCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinCredentials")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Repository over the `credentials` record.
pub struct CredentialsRepository<'a> {
    store: &'a JsonStore,
}

impl<'a> CredentialsRepository<'a> {
    pub fn new(store: &'a JsonStore) -> Self {
        Self { store }
    }

    /// Stored key pair, if both halves are present.
    pub fn get(&self) -> StorageResult<Option<PinCredentials>> {
        let data = self.store.load(CREDENTIALS_KEY)?;
        let public = data.get(PUBLIC_FIELD).and_then(Value::as_str);
        let secret = data.get(SECRET_FIELD).and_then(Value::as_str);
        Ok(match (public, secret) {
            (Some(public), Some(secret)) => Some(PinCredentials {
                public: public.to_string(),
                secret: secret.to_string(),
            }),
            _ => None,
        })
    }

    pub fn exists(&self) -> StorageResult<bool> {
        Ok(self.get()?.is_some())
    }

    /// Integrator address recorded alongside the credentials.
    pub fn integrator_address(&self) -> StorageResult<Option<Address>> {
        let data = self.store.load(CREDENTIALS_KEY)?;
        match data.get(INTEGRATOR_FIELD).and_then(Value::as_str) {
            Some(raw) => Address::parse(raw)
                .map(Some)
                .map_err(|e| StorageError::Corrupted {
                    key: CREDENTIALS_KEY.to_string(),
                    reason: format!("integrator address: {e}"),
                }),
            None => Ok(None),
        }
    }

    /// Replace the credentials, keeping unrelated fields of the record.
    pub fn save(&self, credentials: &PinCredentials, integrator: &Address) -> StorageResult<()> {
        let mut data: Map<String, Value> = self.store.load(CREDENTIALS_KEY)?;
        data.insert(PUBLIC_FIELD.into(), Value::String(credentials.public.clone()));
        data.insert(SECRET_FIELD.into(), Value::String(credentials.secret.clone()));
        data.insert(
            INTEGRATOR_FIELD.into(),
            Value::String(integrator.to_string()),
        );
        self.store.save(CREDENTIALS_KEY, &data)?;
        Ok(())
    }

    /// Forget the credentials (integration removed).
    pub fn clear(&self) -> StorageResult<()> {
        self.store.remove(CREDENTIALS_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoragePaths;

    const INTEGRATOR: &str = "4HifM6Cny7bHAdLb5jw3hHV2KabuzRZV8gmHG1eh4PxJakwi";

    fn test_store() -> (tempfile::TempDir, JsonStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(StoragePaths::new(dir.path())).unwrap();
        (dir, store)
    }

    #[test]
    fn empty_store_has_no_credentials() {
        let (_dir, store) = test_store();
        let repo = CredentialsRepository::new(&store);
        assert_eq!(repo.get().unwrap(), None);
        assert!(!repo.exists().unwrap());
        assert_eq!(repo.integrator_address().unwrap(), None);
    }

    #[test]
    fn save_get_and_clear() {
        let (_dir, store) = test_store();
        let repo = CredentialsRepository::new(&store);
        let creds = PinCredentials {
            public: "pub".into(),
            secret: "sec".into(),
        };
        let integrator = Address::parse(INTEGRATOR).unwrap();

        repo.save(&creds, &integrator).unwrap();
        assert_eq!(repo.get().unwrap(), Some(creds));
        assert_eq!(repo.integrator_address().unwrap(), Some(integrator));

        repo.clear().unwrap();
        assert_eq!(repo.get().unwrap(), None);
    }

    #[test]
    fn half_written_credentials_are_ignored() {
        let (_dir, store) = test_store();
        let mut data = Map::new();
        data.insert(PUBLIC_FIELD.into(), Value::String("only-public".into()));
        store.save(CREDENTIALS_KEY, &data).unwrap();

        assert_eq!(CredentialsRepository::new(&store).get().unwrap(), None);
    }

    #[test]
    fn debug_hides_secret() {
        let creds = PinCredentials {
            public: "pub".into(),
            secret: "top-secret".into(),
        };
        assert!(!format!("{creds:?}").contains("top-secret"));
    }
}
