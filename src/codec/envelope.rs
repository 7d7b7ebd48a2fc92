// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Multi-recipient envelopes.
//!
//! ## Wire format
//!
//! ```text
//! {
//!   "<recipient address>": "0x…",   // ephemeral mnemonic sealed sender → recipient
//!   "<sender address>":    "0x…",   // always present
//!   "data":                "0x…"    // plaintext sealed sender → ephemeral key
//! }
//! ```
//!
//! A reader unwraps the ephemeral mnemonic with its own secret and the
//! sender's public key, rebuilds the ephemeral keyring and opens `data` with
//! the ephemeral secret and the sender's public key.

use std::collections::BTreeMap;
use std::iter;

use serde::{Deserialize, Serialize};
use tracing::warn;
use zeroize::Zeroizing;

use super::sealed::{open, seal, seal_to_key};
use super::CryptoError;
use crate::keys::{Address, KeyRing};

/// Reserved key holding the payload ciphertext.
pub const DATA_KEY: &str = "data";

/// Payload readable by every address listed in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    wrapped_keys: BTreeMap<String, String>,
    data: String,
}

impl Envelope {
    pub fn from_json(json: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(json).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, CryptoError> {
        serde_json::to_string(self).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    /// Addresses that hold a wrapped copy of the ephemeral key.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.wrapped_keys.keys().map(String::as_str)
    }

    pub fn is_recipient(&self, address: &Address) -> bool {
        self.wrapped_keys.contains_key(address.as_str())
    }

    pub fn data(&self) -> &str {
        &self.data
    }
}

/// Encrypt `plaintext` so that the sender and every valid recipient can read it.
///
/// Recipients that cannot be wrapped for (bad address, key off the curve)
/// are left out with a warning.
pub fn encrypt_for<I, A>(
    plaintext: &[u8],
    sender: &KeyRing,
    recipients: I,
) -> Result<Envelope, CryptoError>
where
    I: IntoIterator<Item = A>,
    A: AsRef<str>,
{
    let ephemeral = KeyRing::generate()?;
    let data = seal_to_key(
        plaintext,
        &sender.box_secret(),
        &ephemeral.box_secret().public_key(),
    )?;

    let mut wrapped_keys = BTreeMap::new();
    let everyone = recipients
        .into_iter()
        .map(|recipient| recipient.as_ref().to_string())
        .chain(iter::once(sender.address().to_string()));

    for recipient in everyone {
        if wrapped_keys.contains_key(&recipient) {
            continue;
        }
        match wrap_ephemeral(&ephemeral, sender, &recipient) {
            Ok(wrapped) => {
                wrapped_keys.insert(recipient, wrapped);
            }
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "Skipping recipient for envelope");
            }
        }
    }

    Ok(Envelope { wrapped_keys, data })
}

fn wrap_ephemeral(
    ephemeral: &KeyRing,
    sender: &KeyRing,
    recipient: &str,
) -> Result<String, CryptoError> {
    let address = Address::parse(recipient)?;
    seal(ephemeral.phrase().as_bytes(), sender, &address)
}

/// Decrypt an envelope as `reader`.
pub fn decrypt_as(
    envelope: &Envelope,
    reader: &KeyRing,
    sender_address: &Address,
) -> Result<Vec<u8>, CryptoError> {
    let wrapped = envelope
        .wrapped_keys
        .get(reader.address().as_str())
        .ok_or_else(|| CryptoError::RecipientNotFound(reader.address().to_string()))?;

    let phrase = Zeroizing::new(open(wrapped, reader, sender_address)?);
    let phrase = std::str::from_utf8(&phrase).map_err(|_| CryptoError::DecryptionFailed)?;
    let ephemeral = KeyRing::from_seed(phrase).map_err(|_| CryptoError::DecryptionFailed)?;

    open(&envelope.data, &ephemeral, sender_address)
}

/// Decrypt either an envelope (JSON) or a single sealed value.
pub fn open_message(
    message: &str,
    reader: &KeyRing,
    sender_address: &Address,
) -> Result<Vec<u8>, CryptoError> {
    match serde_json::from_str::<Envelope>(message) {
        Ok(envelope) => decrypt_as(&envelope, reader, sender_address),
        Err(_) => open(message, reader, sender_address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER_SEED: &str =
        "labor now library worry monitor surface sword pulse poem fee cousin outer";
    const SENDER_ADDRESS: &str = "4CsXeZy3VbKnB9YMUBYpgsnsaZXZczF2PXH1bYYGBnH5PRcz";
    const RECEIVER_SEED: &str =
        "perfect gorilla main winner amateur lounge glance oval wash advice blouse top";
    const RECEIVER_ADDRESS: &str = "4FqVtVUCZ1dGSMHAXecNw5AbS4Dib6xZyPPThpDTMdkeXrvp";
    const MESSAGE: &str = "Hello, there is the test message!";

    const RECORDED_ENVELOPE: &str = r#"{
        "4FqVtVUCZ1dGSMHAXecNw5AbS4Dib6xZyPPThpDTMdkeXrvp": "0x80fedf4212aa1f3a67f82ebd46bd820baabb0a9d6b7c2914fff46c07ecc0330dc35ad071c50c5331f86ea1fba19eee96a1a6e5a3b207b2b7aa05a5528493b54df7fdde3ad5f11515b8c89b4f7fb0ad0436e5e524df020f377742acfcf1d4563925f5df5b61e658e8ada8f51fdc683958",
        "4CsXeZy3VbKnB9YMUBYpgsnsaZXZczF2PXH1bYYGBnH5PRcz": "0x80fedf4212aa1f3a67f82ebd46bd820baabb0a9d6b7c29140a89c148ff361396d0394ff1c4817755e127c776f17efc369af32da336bebcb0a82893d304efb92c8e862f795805e068c35a11001d482e94851bf599be472a65f0aea89d310c01f16974f278a84b57a508b55a54a6dc0d5e",
        "data": "0x80fedf4212aa1f3a67f82ebd46bd820baabb0a9d6b7c29143479c1ae1a99a10742fff759a275a818e720dcab2a94feeb67b6748b935e2df27aa8a03cbe7b3d03abfe4c182b404116f2"
    }"#;

    fn parties() -> (KeyRing, KeyRing) {
        (
            KeyRing::from_seed(SENDER_SEED).unwrap(),
            KeyRing::from_seed(RECEIVER_SEED).unwrap(),
        )
    }

    #[test]
    fn both_parties_read_the_test_message() {
        let (sender, receiver) = parties();
        let envelope = encrypt_for(MESSAGE.as_bytes(), &sender, [RECEIVER_ADDRESS]).unwrap();

        let as_receiver = decrypt_as(&envelope, &receiver, sender.address()).unwrap();
        let as_sender = decrypt_as(&envelope, &sender, sender.address()).unwrap();
        assert_eq!(as_receiver, MESSAGE.as_bytes());
        assert_eq!(as_sender, MESSAGE.as_bytes());

        let outsider = KeyRing::generate().unwrap();
        assert!(matches!(
            decrypt_as(&envelope, &outsider, sender.address()),
            Err(CryptoError::RecipientNotFound(addr)) if addr == outsider.address().as_str()
        ));
    }

    #[test]
    fn recorded_envelope_still_decrypts() {
        let (sender, receiver) = parties();
        let sender_address = Address::parse(SENDER_ADDRESS).unwrap();

        let as_receiver = open_message(RECORDED_ENVELOPE, &receiver, &sender_address).unwrap();
        let as_sender = open_message(RECORDED_ENVELOPE, &sender, &sender_address).unwrap();
        assert_eq!(as_receiver, MESSAGE.as_bytes());
        assert_eq!(as_sender, MESSAGE.as_bytes());
    }

    #[test]
    fn round_trip_for_every_recipient() {
        let sender = KeyRing::generate().unwrap();
        let readers: Vec<KeyRing> = (0..4).map(|_| KeyRing::generate().unwrap()).collect();
        let addresses: Vec<String> = readers.iter().map(|r| r.address().to_string()).collect();

        let large = vec![42u8; 10_000];
        let cases: [&[u8]; 4] = [b"", b"x", &[0, 255, 1, 254], &large];
        for plaintext in cases {
            let envelope = encrypt_for(plaintext, &sender, &addresses).unwrap();
            assert_eq!(envelope.recipients().count(), readers.len() + 1);
            for reader in readers.iter().chain(iter::once(&sender)) {
                assert_eq!(
                    decrypt_as(&envelope, reader, sender.address()).unwrap(),
                    plaintext
                );
            }
        }
    }

    #[test]
    fn bad_recipients_are_skipped() {
        let (sender, receiver) = parties();
        let envelope = encrypt_for(
            b"report",
            &sender,
            ["not-an-address", RECEIVER_ADDRESS, "data"],
        )
        .unwrap();

        let mut recipients: Vec<&str> = envelope.recipients().collect();
        recipients.sort();
        let mut expected = vec![SENDER_ADDRESS, RECEIVER_ADDRESS];
        expected.sort();
        assert_eq!(recipients, expected);
        assert_eq!(
            decrypt_as(&envelope, &receiver, sender.address()).unwrap(),
            b"report"
        );
    }

    #[test]
    fn sender_listed_twice_is_wrapped_once() {
        let (sender, _) = parties();
        let envelope = encrypt_for(b"x", &sender, [SENDER_ADDRESS]).unwrap();
        assert_eq!(envelope.recipients().count(), 1);
        assert!(envelope.is_recipient(sender.address()));
    }

    #[test]
    fn tampered_data_is_rejected() {
        let (sender, receiver) = parties();
        let envelope = encrypt_for(MESSAGE.as_bytes(), &sender, [RECEIVER_ADDRESS]).unwrap();

        let raw = hex::decode(&envelope.data()[2..]).unwrap();
        for index in [0, 23, 24, 39, 40, raw.len() - 1] {
            let mut flipped = raw.clone();
            flipped[index] ^= 0x01;
            let mut tampered = envelope.clone();
            tampered.data = format!("0x{}", hex::encode(flipped));
            assert!(matches!(
                decrypt_as(&tampered, &receiver, sender.address()),
                Err(CryptoError::DecryptionFailed)
            ));
        }

        let mut truncated = envelope.clone();
        truncated.data.truncate(30);
        assert!(matches!(
            decrypt_as(&truncated, &receiver, sender.address()),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn wrong_sender_key_is_rejected() {
        let (sender, receiver) = parties();
        let envelope = encrypt_for(b"x", &sender, [RECEIVER_ADDRESS]).unwrap();
        let other = KeyRing::generate().unwrap();
        assert!(matches!(
            decrypt_as(&envelope, &receiver, other.address()),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn wire_format_is_flat_with_data_last() {
        let (sender, _) = parties();
        let envelope = encrypt_for(b"x", &sender, [RECEIVER_ADDRESS]).unwrap();
        let json = envelope.to_json().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        for (_, sealed) in object {
            let sealed = sealed.as_str().unwrap();
            assert!(sealed.starts_with("0x"));
            assert_eq!(sealed, sealed.to_lowercase());
        }
        assert!(json.trim_end_matches('}').ends_with(&format!(
            "\"data\":\"{}\"",
            envelope.data()
        )));
        assert_eq!(Envelope::from_json(&json).unwrap(), envelope);
    }

    #[test]
    fn open_message_accepts_single_sealed_value() {
        let (sender, receiver) = parties();
        let sealed = seal(b"creds", &sender, receiver.address()).unwrap();
        assert_eq!(
            open_message(&sealed, &receiver, sender.address()).unwrap(),
            b"creds"
        );
    }
}
