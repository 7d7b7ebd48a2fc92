// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory pin store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{FileBlob, PinError, PinStore};

/// Pin store keeping content in memory, with revocation that can be scripted.
#[derive(Default)]
pub struct InMemoryPinStore {
    pinned: Mutex<BTreeMap<String, Vec<u8>>>,
    unpinned: Mutex<Vec<String>>,
    revoked_remaining: AtomicUsize,
    /// Pins still accepted before the scripted revocation starts.
    revoke_grace: AtomicUsize,
    attempts: AtomicUsize,
}

impl InMemoryPinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` pin attempts with revoked credentials.
    pub fn revoke_next(&self, count: usize) {
        self.revoke_grace.store(0, Ordering::SeqCst);
        self.revoked_remaining.store(count, Ordering::SeqCst);
    }

    /// Accept `accepted` more pins, then reject one with revoked credentials.
    pub fn revoke_after(&self, accepted: usize) {
        self.revoke_grace.store(accepted, Ordering::SeqCst);
        self.revoked_remaining.store(1, Ordering::SeqCst);
    }

    /// Pin attempts seen so far, including rejected ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn contents(&self, content_id: &str) -> Option<Vec<u8>> {
        self.pinned.lock().await.get(content_id).cloned()
    }

    pub async fn pinned_ids(&self) -> Vec<String> {
        self.pinned.lock().await.keys().cloned().collect()
    }

    /// Content ids released so far, in call order.
    pub async fn unpinned(&self) -> Vec<String> {
        self.unpinned.lock().await.clone()
    }
}

fn content_id(bytes: &[u8]) -> String {
    format!("Qm{}", bs58::encode(Sha256::digest(bytes)).into_string())
}

#[async_trait]
impl PinStore for InMemoryPinStore {
    async fn pin_file(&self, file: &FileBlob) -> Result<String, PinError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let in_grace = self.revoked_remaining.load(Ordering::SeqCst) > 0
            && self
                .revoke_grace
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        let revoked = !in_grace
            && self
                .revoked_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if revoked {
            return Err(PinError::CredentialsRevoked);
        }

        let id = content_id(&file.bytes);
        self.pinned.lock().await.insert(id.clone(), file.bytes.clone());
        Ok(id)
    }

    async fn unpin(&self, content_id: &str) -> Result<(), PinError> {
        self.unpinned.lock().await.push(content_id.to_string());
        self.pinned.lock().await.remove(content_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_content_shares_an_id() {
        let store = InMemoryPinStore::new();
        let a = store.pin_file(&FileBlob::new("a", b"same".to_vec())).await.unwrap();
        let b = store.pin_file(&FileBlob::new("b", b"same".to_vec())).await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("Qm"));
        assert_eq!(store.contents(&a).await, Some(b"same".to_vec()));
        assert_eq!(store.attempts(), 2);
    }

    #[tokio::test]
    async fn unpin_removes_content() {
        let store = InMemoryPinStore::new();
        let id = store.pin_file(&FileBlob::new("a", b"x".to_vec())).await.unwrap();
        store.unpin(&id).await.unwrap();
        assert!(store.pinned_ids().await.is_empty());
        assert_eq!(store.unpinned().await, vec![id]);
    }
}
