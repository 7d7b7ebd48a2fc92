// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Hybrid Codec
//!
//! Authenticated public-key encryption between accounts, and the
//! multi-recipient [`Envelope`] built on top of it.
//!
//! Both layers are synchronous and CPU-bound. Async callers run them on the
//! blocking pool (`tokio::task::spawn_blocking`).

pub mod envelope;
pub mod sealed;

pub use envelope::{decrypt_as, encrypt_for, open_message, Envelope, DATA_KEY};
pub use sealed::{open, seal};

use crate::keys::{AddressError, KeyError};

/// Errors raised by the codec. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    Key(#[from] KeyError),

    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),

    #[error("Recipient not found in envelope: {0}")]
    RecipientNotFound(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Codec task failed: {0}")]
    Task(String),
}

/// Run a codec operation on the blocking pool.
pub async fn run_blocking<T, F>(op: F) -> Result<T, CryptoError>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| CryptoError::Task(e.to_string()))?
}
