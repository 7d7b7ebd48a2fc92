// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Content Pinning
//!
//! Content-addressed storage for encrypted report files.
//!
//! - `pin` uploads each file and returns `filename → content id`
//! - `unpin` releases one content id; callers use [`unpin_best_effort`]
//!   which skips values that are not content ids and only logs failures
//!
//! A revoked API key surfaces as [`PinError::CredentialsRevoked`] so the
//! caller can re-register and retry.

pub mod memory;
pub mod pinata;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, error, warn};

pub use memory::InMemoryPinStore;
pub use pinata::PinataPinStore;

/// Filename → content id (or, for inline reports, filename → sealed value).
pub type ContentIds = BTreeMap<String, String>;

/// A named file to pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PinError {
    #[error("Pinning credentials were revoked")]
    CredentialsRevoked,

    #[error("No pinning credentials stored")]
    MissingCredentials,

    #[error("Pinning request failed: {0}")]
    Request(String),

    #[error("Pinning backend rejected {file}: {reason}")]
    Rejected { file: String, reason: String },

    #[error("No file could be pinned")]
    NothingPinned,
}

/// Content-addressed storage backend.
#[async_trait]
pub trait PinStore: Send + Sync {
    /// Pin one file and return its content id.
    async fn pin_file(&self, file: &FileBlob) -> Result<String, PinError>;

    /// Release a content id.
    async fn unpin(&self, content_id: &str) -> Result<(), PinError>;

    /// Pin every file. Files the backend refuses are skipped; missing or
    /// revoked credentials abort after releasing what was already pinned.
    async fn pin(&self, files: &[FileBlob]) -> Result<ContentIds, PinError> {
        let mut pinned = ContentIds::new();
        for file in files {
            match self.pin_file(file).await {
                Ok(content_id) => {
                    debug!(file = %file.name, content_id = %content_id, "File pinned");
                    pinned.insert(file.name.clone(), content_id);
                }
                Err(e @ (PinError::CredentialsRevoked | PinError::MissingCredentials)) => {
                    for (name, content_id) in &pinned {
                        if let Err(unpin_error) = self.unpin(content_id).await {
                            warn!(
                                file = %name,
                                content_id = %content_id,
                                error = %unpin_error,
                                "Failed to release partial bundle"
                            );
                        }
                    }
                    return Err(e);
                }
                Err(e) => error!(file = %file.name, error = %e, "Failed to pin file"),
            }
        }
        if pinned.is_empty() {
            return Err(PinError::NothingPinned);
        }
        Ok(pinned)
    }
}

/// Whether `value` looks like an IPFS content id (CIDv0 or base32 CIDv1).
pub fn looks_like_content_id(value: &str) -> bool {
    value.starts_with("Qm") || value.starts_with("baf")
}

/// Release every content id in `ids`. Errors are logged, never returned.
pub async fn unpin_best_effort(store: &dyn PinStore, ids: &ContentIds) -> usize {
    let mut released = 0;
    for (name, value) in ids {
        if !looks_like_content_id(value) {
            continue;
        }
        match store.unpin(value).await {
            Ok(()) => {
                released += 1;
                debug!(file = %name, content_id = %value, "Unpinned");
            }
            Err(e) => warn!(file = %name, content_id = %value, error = %e, "Failed to unpin"),
        }
    }
    released
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_detection() {
        assert!(looks_like_content_id("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"));
        assert!(looks_like_content_id(
            "bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi"
        ));
        assert!(!looks_like_content_id("0xdeadbeef"));
        assert!(!looks_like_content_id(""));
    }

    #[tokio::test]
    async fn unpin_skips_inline_values() {
        let store = InMemoryPinStore::new();
        let pinned = store
            .pin(&[FileBlob::new("home-assistant.log", b"log".to_vec())])
            .await
            .unwrap();

        let mut ids = pinned.clone();
        ids.insert("issue_description.json".into(), "0xabcdef".into());

        assert_eq!(unpin_best_effort(&store, &ids).await, 1);
        assert_eq!(
            store.unpinned().await,
            pinned.values().cloned().collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn pin_returns_nothing_pinned_for_empty_bundle() {
        let store = InMemoryPinStore::new();
        assert_eq!(store.pin(&[]).await, Err(PinError::NothingPinned));
    }

    #[tokio::test]
    async fn revoked_credentials_abort_pinning() {
        let store = InMemoryPinStore::new();
        store.revoke_next(1);
        let files = [FileBlob::new("a", b"1".to_vec()), FileBlob::new("b", b"2".to_vec())];
        assert_eq!(store.pin(&files).await, Err(PinError::CredentialsRevoked));
        assert_eq!(store.pin(&files).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn revocation_mid_bundle_releases_pinned_files() {
        let store = InMemoryPinStore::new();
        store.revoke_after(1);
        let files = [FileBlob::new("a", b"1".to_vec()), FileBlob::new("b", b"2".to_vec())];

        assert_eq!(store.pin(&files).await, Err(PinError::CredentialsRevoked));
        assert_eq!(store.attempts(), 2);
        assert_eq!(store.unpinned().await.len(), 1);
        assert!(store.pinned_ids().await.is_empty());

        assert_eq!(store.pin(&files).await.unwrap().len(), 2);
    }
}
