// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persisted State
//!
//! Small versioned JSON records, atomically replaced on write.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//!   .storage/
//!     report_courier.account       # device seed, owner details
//!     report_courier.credentials   # pinning keys + integrator address
//!   home-assistant.log             # collected into reports (read only)
//!   .storage/trace.saved_traces    # collected into reports (read only)
//! ```

pub mod json_store;
pub mod paths;
pub mod repository;

pub use json_store::{JsonStore, StorageError, StorageResult, STORAGE_VERSION};
pub use paths::StoragePaths;
pub use repository::{
    AccountRecord, AccountRepository, CredentialsRepository, PinCredentials, ACCOUNT_KEY,
    CREDENTIALS_KEY,
};
