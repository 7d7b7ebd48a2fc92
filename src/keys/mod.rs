// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account identities: seed → keypair → address.

pub mod keyring;
pub mod ss58;

pub use keyring::{KeyError, KeyRing};
pub use ss58::{Address, AddressError, DEFAULT_PREFIX};
