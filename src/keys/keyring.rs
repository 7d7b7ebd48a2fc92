// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Account keypairs derived from a seed.
//!
//! ## Seed formats
//!
//! - BIP39 English mnemonic: the mnemonic *entropy* is stretched with
//!   PBKDF2-HMAC-SHA512 (salt `"mnemonic"`, 2048 rounds) and the first 32
//!   bytes become the ed25519 secret.
//! - `0x`-prefixed hex of a raw 32-byte ed25519 secret.
//!
//! The same ed25519 key is used for encryption by mapping it onto
//! Curve25519: the secret half is the clamped first half of
//! `SHA-512(secret)`, the public half is the Montgomery form of the
//! Edwards point.

use std::fmt;

use bip39::{Language, Mnemonic};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::SigningKey;
use hmac::Hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use zeroize::{Zeroize, Zeroizing};

use super::ss58::Address;

const PBKDF2_ROUNDS: u32 = 2048;
const PBKDF2_SALT: &[u8] = b"mnemonic";
const SECRET_LEN: usize = 32;

/// Entropy for freshly generated mnemonics (12 words).
const GENERATED_ENTROPY_LEN: usize = 16;

/// Errors raised while turning a seed into a keypair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid hex seed: {0}")]
    InvalidHexSeed(String),

    #[error("Public key of {0} is not a valid curve point")]
    NotOnCurve(String),
}

/// A seed together with the keys and address derived from it.
#[derive(Clone)]
pub struct KeyRing {
    phrase: Zeroizing<String>,
    signing: SigningKey,
    address: Address,
}

impl KeyRing {
    /// Derive a keyring from a mnemonic phrase or a `0x` hex secret.
    pub fn from_seed(seed: &str) -> Result<Self, KeyError> {
        let seed = seed.trim();
        let mut secret = if let Some(hex_seed) = seed.strip_prefix("0x") {
            secret_from_hex(hex_seed)?
        } else {
            secret_from_mnemonic(seed)?
        };

        let signing = SigningKey::from_bytes(&secret);
        secret.zeroize();

        let address = Address::from_public_key(signing.verifying_key().to_bytes());
        Ok(Self {
            phrase: Zeroizing::new(seed.to_string()),
            signing,
            address,
        })
    }

    /// Create a keyring from a fresh 12-word mnemonic.
    pub fn generate() -> Result<Self, KeyError> {
        let mut entropy = [0u8; GENERATED_ENTROPY_LEN];
        OsRng.fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .map_err(|e| KeyError::InvalidMnemonic(e.to_string()));
        entropy.zeroize();
        let phrase = Zeroizing::new(mnemonic?.to_string());
        Self::from_seed(&phrase)
    }

    /// The seed this keyring was built from, as given (trimmed).
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Raw ed25519 public key.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// Curve25519 secret used for authenticated encryption.
    pub(crate) fn box_secret(&self) -> crypto_box::SecretKey {
        let digest = Sha512::digest(self.signing.to_bytes());
        let mut scalar = [0u8; SECRET_LEN];
        scalar.copy_from_slice(&digest[..SECRET_LEN]);
        scalar[0] &= 248;
        scalar[31] &= 127;
        scalar[31] |= 64;
        crypto_box::SecretKey::from(scalar)
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("address", &self.address)
            .field("seed", &"<redacted>")
            .finish()
    }
}

/// Curve25519 public key for the account behind `address`.
pub(crate) fn box_public_key(address: &Address) -> Result<crypto_box::PublicKey, KeyError> {
    let point = CompressedEdwardsY(*address.public_key())
        .decompress()
        .ok_or_else(|| KeyError::NotOnCurve(address.to_string()))?;
    Ok(crypto_box::PublicKey::from(point.to_montgomery().to_bytes()))
}

fn secret_from_hex(hex_seed: &str) -> Result<[u8; SECRET_LEN], KeyError> {
    let bytes = Zeroizing::new(
        hex::decode(hex_seed).map_err(|e| KeyError::InvalidHexSeed(e.to_string()))?,
    );
    if bytes.len() != SECRET_LEN {
        return Err(KeyError::InvalidHexSeed(format!(
            "expected {SECRET_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut secret = [0u8; SECRET_LEN];
    secret.copy_from_slice(&bytes);
    Ok(secret)
}

fn secret_from_mnemonic(phrase: &str) -> Result<[u8; SECRET_LEN], KeyError> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| KeyError::InvalidMnemonic(e.to_string()))?;
    let entropy = Zeroizing::new(mnemonic.to_entropy());

    let mut stretched = Zeroizing::new([0u8; 64]);
    pbkdf2::pbkdf2::<Hmac<Sha512>>(&entropy, PBKDF2_SALT, PBKDF2_ROUNDS, &mut stretched[..])
        .map_err(|e| KeyError::InvalidMnemonic(e.to_string()))?;

    let mut secret = [0u8; SECRET_LEN];
    secret.copy_from_slice(&stretched[..SECRET_LEN]);
    Ok(secret)
}
