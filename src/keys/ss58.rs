// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SS58 account addresses.
//!
//! ## Layout
//!
//! ```text
//! base58( prefix(1|2) ‖ public_key(32) ‖ checksum(2) )
//! checksum = blake2b-512("SS58PRE" ‖ prefix ‖ public_key)[0..2]
//! ```
//!
//! Prefixes below 64 take one byte, prefixes 64..16383 take two.

use std::fmt;
use std::str::FromStr;

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};

/// Network prefix used by the ledger the reports are recorded on.
pub const DEFAULT_PREFIX: u16 = 32;

const CHECKSUM_LEN: usize = 2;
const PUBLIC_KEY_LEN: usize = 32;
const SS58_PRE: &[u8] = b"SS58PRE";

/// Errors raised while parsing an address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid base58: {0}")]
    Base58(String),

    #[error("Unsupported address prefix byte: {0}")]
    InvalidPrefix(u8),

    #[error("Invalid address length: {0} bytes")]
    InvalidLength(usize),

    #[error("Address checksum mismatch")]
    BadChecksum,
}

/// An account address together with the public key it encodes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    encoded: String,
    prefix: u16,
    public_key: [u8; PUBLIC_KEY_LEN],
}

impl Address {
    /// Parse and checksum-verify an SS58 string.
    pub fn parse(encoded: &str) -> Result<Self, AddressError> {
        let (prefix, public_key) = decode(encoded)?;
        Ok(Self {
            encoded: encoded.to_string(),
            prefix,
            public_key,
        })
    }

    /// Encode a public key under the default network prefix.
    pub fn from_public_key(public_key: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self::with_prefix(public_key, DEFAULT_PREFIX)
    }

    /// Encode a public key under an explicit network prefix.
    pub fn with_prefix(public_key: [u8; PUBLIC_KEY_LEN], prefix: u16) -> Self {
        Self {
            encoded: encode(&public_key, prefix),
            prefix,
            public_key,
        }
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    pub fn prefix(&self) -> u16 {
        self.prefix
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.encoded)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.encoded
    }
}

fn prefix_bytes(prefix: u16) -> Vec<u8> {
    if prefix < 64 {
        vec![prefix as u8]
    } else {
        let first = (((prefix & 0b0000_0000_1111_1100) as u8) >> 2) | 0b0100_0000;
        let second = ((prefix >> 8) as u8) | (((prefix & 0b0000_0000_0000_0011) as u8) << 6);
        vec![first, second]
    }
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Blake2b512::new();
    hasher.update(SS58_PRE);
    hasher.update(body);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

fn encode(public_key: &[u8; PUBLIC_KEY_LEN], prefix: u16) -> String {
    let mut body = prefix_bytes(prefix);
    body.extend_from_slice(public_key);
    let sum = checksum(&body);
    body.extend_from_slice(&sum);
    bs58::encode(body).into_string()
}

fn decode(encoded: &str) -> Result<(u16, [u8; PUBLIC_KEY_LEN]), AddressError> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| AddressError::Base58(e.to_string()))?;

    let (prefix, prefix_len) = match bytes.first() {
        Some(&first) if first < 64 => (first as u16, 1),
        Some(&first) if first < 128 => {
            let second = *bytes.get(1).ok_or(AddressError::InvalidLength(bytes.len()))?;
            let lower = (first << 2) | (second >> 6);
            let upper = second & 0b0011_1111;
            ((lower as u16) | ((upper as u16) << 8), 2)
        }
        Some(&first) => return Err(AddressError::InvalidPrefix(first)),
        None => return Err(AddressError::InvalidLength(0)),
    };

    if bytes.len() != prefix_len + PUBLIC_KEY_LEN + CHECKSUM_LEN {
        return Err(AddressError::InvalidLength(bytes.len()));
    }

    let (body, sum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if checksum(body).as_slice() != sum {
        return Err(AddressError::BadChecksum);
    }

    let mut public_key = [0u8; PUBLIC_KEY_LEN];
    public_key.copy_from_slice(&body[prefix_len..]);
    Ok((prefix, public_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER: &str = "4CsXeZy3VbKnB9YMUBYpgsnsaZXZczF2PXH1bYYGBnH5PRcz";
    const SENDER_PK: &str = "1e10a0e3e914c5e12090b52f38b70ff20988be0f72a187108e78c1a20ea3165c";
    const INTEGRATOR: &str = "4HifM6Cny7bHAdLb5jw3hHV2KabuzRZV8gmHG1eh4PxJakwi";
    const INTEGRATOR_PK: &str = "f47a80c7bd9b9c9ab7b0a84803aa3420bac034b449a566848509d2cee2747df1";

    #[test]
    fn parses_known_addresses() {
        let sender = Address::parse(SENDER).unwrap();
        assert_eq!(sender.prefix(), DEFAULT_PREFIX);
        assert_eq!(hex::encode(sender.public_key()), SENDER_PK);

        let integrator: Address = INTEGRATOR.parse().unwrap();
        assert_eq!(hex::encode(integrator.public_key()), INTEGRATOR_PK);
    }

    #[test]
    fn encodes_public_key_to_known_address() {
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&hex::decode(SENDER_PK).unwrap());
        assert_eq!(Address::from_public_key(pk).as_str(), SENDER);
    }

    #[test]
    fn two_byte_prefix_survives_encoding() {
        let address = Address::with_prefix([7u8; 32], 2254);
        let parsed = Address::parse(address.as_str()).unwrap();
        assert_eq!(parsed.prefix(), 2254);
        assert_eq!(parsed.public_key(), &[7u8; 32]);
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut tampered = SENDER.to_string();
        tampered.pop();
        tampered.push('d');
        assert_eq!(Address::parse(&tampered), Err(AddressError::BadChecksum));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(Address::parse("0OIl"), Err(AddressError::Base58(_))));
        assert!(matches!(Address::parse("abc"), Err(AddressError::InvalidLength(_))));
    }

    #[test]
    fn serde_uses_plain_string() {
        let address = Address::parse(SENDER).unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{SENDER}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
        assert!(serde_json::from_str::<Address>("\"not-an-address\"").is_err());
    }
}
