// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Service status shared with the host UI.

use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Starting,
    /// Waiting for storage credentials from the integrator.
    Registering,
    /// Waiting for the device to join the ledger subscription.
    AwaitingSubscription,
    Ready,
    Stopped,
}

/// Writable status cell. Clones share the same value.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: watch::Sender<ServiceStatus>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServiceStatus::Starting);
        Self { tx }
    }

    pub fn current(&self) -> ServiceStatus {
        *self.tx.borrow()
    }

    pub fn set(&self, status: ServiceStatus) {
        self.tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceStatus> {
        self.tx.subscribe()
    }
}
