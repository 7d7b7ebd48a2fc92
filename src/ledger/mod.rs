// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Writes
//!
//! Proof-of-handoff records are written to a public ledger through the
//! [`Ledger`] capability. Writes are serialized by the [`SubmissionQueue`],
//! which fails over across an [`EndpointRing`] and compensates failed writes
//! by unpinning the report content.
//!
//! ## Failure classes
//!
//! | Error | Queue reaction |
//! |-------|----------------|
//! | `Timeout` | advance the ring, retry (one full rotation at most) |
//! | `Congested` | cool down, retry the same endpoint |
//! | `Fatal` | abort the write, unpin |

pub mod memory;
pub mod queue;
pub mod rws;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::keys::Address;

pub use memory::{InMemoryLedger, LedgerAttempt};
pub use queue::{PendingWrite, SubmissionQueue, SubmissionSettings, SubmissionWorker, WriteOutcome};

/// RPC error code for "transaction pool priority too low".
pub const CONGESTION_CODE: i64 = 1014;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger endpoint timed out")]
    Timeout,

    #[error("Ledger is congested (code {code})")]
    Congested { code: i64 },

    #[error("Ledger write failed: {0}")]
    Fatal(String),
}

impl LedgerError {
    /// Classify an RPC error returned by a ledger node.
    pub fn from_rpc(code: i64, message: &str) -> Self {
        if code == CONGESTION_CODE {
            LedgerError::Congested { code }
        } else {
            LedgerError::Fatal(format!("rpc error {code}: {message}"))
        }
    }
}

/// Proof that a write was included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub endpoint: String,
    pub tx_hash: String,
}

/// Ledger client capability.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Submit `payload` through `endpoint`, paid by the subscription owned by
    /// `delegate`.
    async fn submit(
        &self,
        endpoint: &str,
        delegate: &Address,
        payload: &str,
    ) -> Result<Receipt, LedgerError>;
}

/// Stand-in when the host provides no ledger client. Every write fails as
/// fatal, so the queue releases the report's pinned content.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLedgerClient;

#[async_trait]
impl Ledger for NoLedgerClient {
    async fn submit(
        &self,
        endpoint: &str,
        _delegate: &Address,
        _payload: &str,
    ) -> Result<Receipt, LedgerError> {
        Err(LedgerError::Fatal(format!(
            "no ledger client configured for {endpoint}"
        )))
    }
}

/// Ordered ledger endpoints with a circular cursor.
#[derive(Debug)]
pub struct EndpointRing {
    endpoints: Vec<String>,
    cursor: AtomicUsize,
}

impl EndpointRing {
    pub fn new(endpoints: Vec<String>) -> Result<Self, LedgerError> {
        if endpoints.is_empty() {
            return Err(LedgerError::Fatal("no ledger endpoints configured".to_string()));
        }
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Endpoint under the cursor.
    pub fn current(&self) -> &str {
        let index = self.cursor.load(Ordering::SeqCst) % self.endpoints.len();
        &self.endpoints[index]
    }

    /// Move the cursor one position and return the new endpoint.
    pub fn advance(&self) -> &str {
        let len = self.endpoints.len();
        let previous = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len))
            .unwrap_or_default();
        &self.endpoints[(previous + 1) % len]
    }
}
