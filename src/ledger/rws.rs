// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RWS subscription membership.
//!
//! Ledger writes are paid by a subscription owned by the delegate account.
//! Until the owner adds this device to the subscription's device list the
//! writes would be rejected, so hosts wait for membership first.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::LedgerError;
use crate::events::wait_until;
use crate::keys::Address;

/// Device list update emitted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDevices {
    pub owner: Address,
    pub devices: Vec<Address>,
}

/// Read access to subscription device lists.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn devices(&self, owner: &Address) -> Result<Vec<Address>, LedgerError>;

    /// Stream of device list updates for every subscription.
    async fn device_updates(&self) -> Result<BoxStream<'static, NewDevices>, LedgerError>;
}

/// Wait until `device` is listed in `owner`'s subscription.
///
/// Returns `Ok(false)` when cancelled or when the update stream ends.
pub async fn wait_for_membership(
    directory: &dyn DeviceDirectory,
    owner: &Address,
    device: &Address,
    cancel: &CancellationToken,
) -> Result<bool, LedgerError> {
    if owner == device {
        return Ok(true);
    }

    // Subscribe before the snapshot so an update landing in between is seen.
    let updates = directory.device_updates().await?;
    if directory.devices(owner).await?.contains(device) {
        debug!(owner = %owner, device = %device, "Device already in subscription");
        return Ok(true);
    }

    info!(owner = %owner, device = %device, "Waiting for device to join subscription");
    let joined = wait_until(updates, |update| {
        update.owner == *owner && update.devices.contains(device)
    });

    tokio::select! {
        found = joined => Ok(found.is_some()),
        _ = cancel.cancelled() => Ok(false),
    }
}
