// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory ledger with scriptable failures.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{Ledger, LedgerError, Receipt};
use crate::keys::Address;

/// One call to [`Ledger::submit`] as seen by the in-memory ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAttempt {
    pub endpoint: String,
    pub delegate: String,
    pub payload: String,
}

#[derive(Default)]
pub struct InMemoryLedger {
    script: Mutex<VecDeque<LedgerError>>,
    always: Mutex<Option<LedgerError>>,
    attempts: Mutex<Vec<LedgerAttempt>>,
    committed: Mutex<Vec<String>>,
    latency: Duration,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every submission by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next submission with `error`. Calls stack in order.
    pub async fn fail_next(&self, error: LedgerError) {
        self.script.lock().await.push_back(error);
    }

    /// Fail every submission with `error` once the script is exhausted.
    pub async fn fail_always(&self, error: LedgerError) {
        *self.always.lock().await = Some(error);
    }

    pub async fn attempts(&self) -> Vec<LedgerAttempt> {
        self.attempts.lock().await.clone()
    }

    /// Payloads written so far, in commit order.
    pub async fn committed(&self) -> Vec<String> {
        self.committed.lock().await.clone()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn submit(
        &self,
        endpoint: &str,
        delegate: &Address,
        payload: &str,
    ) -> Result<Receipt, LedgerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.attempts.lock().await.push(LedgerAttempt {
            endpoint: endpoint.to_string(),
            delegate: delegate.to_string(),
            payload: payload.to_string(),
        });

        if let Some(error) = self.script.lock().await.pop_front() {
            return Err(error);
        }
        if let Some(error) = self.always.lock().await.clone() {
            return Err(error);
        }

        self.committed.lock().await.push(payload.to_string());
        Ok(Receipt {
            endpoint: endpoint.to_string(),
            tx_hash: format!("0x{}", hex::encode(Sha256::digest(payload.as_bytes()))),
        })
    }
}
