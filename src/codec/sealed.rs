// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-recipient authenticated boxes.
//!
//! A sealed value is `0x` + lowercase hex of
//!
//! ```text
//! nonce(24) ‖ poly1305 tag(16) ‖ xsalsa20 ciphertext
//! ```
//!
//! which is byte-compatible with libsodium `crypto_box_easy` output
//! prefixed by its nonce.

use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{PublicKey, SalsaBox, SecretKey};

use super::CryptoError;
use crate::keys::keyring::box_public_key;
use crate::keys::{Address, KeyRing};

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Encrypt `message` from `sender` to the account behind `recipient`.
pub fn seal(message: &[u8], sender: &KeyRing, recipient: &Address) -> Result<String, CryptoError> {
    let recipient_key = box_public_key(recipient)?;
    seal_to_key(message, &sender.box_secret(), &recipient_key)
}

/// Decrypt a value sealed by `sender` for `reader`.
pub fn open(sealed: &str, reader: &KeyRing, sender: &Address) -> Result<Vec<u8>, CryptoError> {
    let sender_key = box_public_key(sender)?;
    open_from_key(sealed, &reader.box_secret(), &sender_key)
}

pub(crate) fn seal_to_key(
    message: &[u8],
    secret: &SecretKey,
    public: &PublicKey,
) -> Result<String, CryptoError> {
    let salsa_box = SalsaBox::new(public, secret);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);
    let ciphertext = salsa_box
        .encrypt(&nonce, message)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut raw = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    raw.extend_from_slice(&nonce);
    raw.extend_from_slice(&ciphertext);
    Ok(format!("0x{}", hex::encode(raw)))
}

pub(crate) fn open_from_key(
    sealed: &str,
    secret: &SecretKey,
    public: &PublicKey,
) -> Result<Vec<u8>, CryptoError> {
    let sealed = sealed.trim();
    let hex_part = sealed.strip_prefix("0x").unwrap_or(sealed);
    let raw = hex::decode(hex_part).map_err(|_| CryptoError::DecryptionFailed)?;
    if raw.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
    SalsaBox::new(public, secret)
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
