// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Typed repositories over the JSON record store.

pub mod accounts;
pub mod credentials;

pub use accounts::{AccountRecord, AccountRepository, ACCOUNT_KEY};
pub use credentials::{CredentialsRepository, PinCredentials, CREDENTIALS_KEY};
