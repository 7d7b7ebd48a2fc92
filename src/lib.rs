// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Report Courier - secure diagnostic report delivery
//!
//! Encrypts device reports for several key holders, hands them to an
//! integrator over a relay, pins the files to content-addressed storage and
//! records proof of the handoff on a ledger.
//!
//! ## Modules
//!
//! - `keys` - seeds, keyrings and SS58 addresses
//! - `codec` - sealed values and multi-recipient envelopes
//! - `transport` - relay links (WebSocket and in-memory)
//! - `correlator` - request/response matching over relay topics
//! - `registration` - storage credential exchange with the integrator
//! - `report` - bundling, delivery and the report orchestrator
//! - `pinning` - content-addressed storage backends
//! - `ledger` - endpoint failover and the submission queue
//! - `sources` - problem events from host logs and device checks
//! - `storage` - JSON records on disk
//! - `service` - assembles the pipeline from configuration

pub mod codec;
pub mod config;
pub mod correlator;
pub mod error;
pub mod events;
pub mod keys;
pub mod ledger;
pub mod logging;
pub mod pinning;
pub mod registration;
pub mod report;
pub mod service;
pub mod sources;
pub mod status;
pub mod storage;
pub mod transport;
