// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Registration
//!
//! Obtains pinning credentials from the integrator.
//!
//! ```text
//! /integratorAddress  {"address": me}            → /integratorAddress/{me}
//!                     {"integrator_address": ..}
//! /initialization     {"email": <envelope>,       → /pinataCreds/{me}
//!                      "sender_address": me}        {"public": <sealed>, "private": <sealed>}
//! ```
//!
//! The email envelope is readable by the integrator (and the device itself).
//! The credential values are sealed by the integrator for the device.
//!
//! Registration runs once when no credentials are stored, and again whenever
//! the pinning backend reports the stored key as revoked. Concurrent
//! refreshes collapse into one: each caller passes the credentials
//! generation it saw, and a caller that arrives after the generation moved
//! on simply reuses the new credentials.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{self, CryptoError};
use crate::config::{CREDENTIALS_RESPONSE_TOPIC, INITIALIZATION_TOPIC, INTEGRATOR_LOOKUP_TOPIC};
use crate::correlator::RequestCorrelator;
use crate::keys::{Address, KeyRing};
use crate::status::{ServiceStatus, StatusHandle};
use crate::storage::{CredentialsRepository, JsonStore, PinCredentials, StorageError};
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Relay exchange failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Credential encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Credential storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Malformed registration response: {0}")]
    MalformedResponse(String),
}

pub struct RegistrationFlow {
    correlator: RequestCorrelator,
    store: Arc<JsonStore>,
    keyring: KeyRing,
    owner_email: String,
    backoff: Duration,
    status: StatusHandle,
    generation: AtomicU64,
    flight: Mutex<()>,
}

impl RegistrationFlow {
    pub fn new(
        correlator: RequestCorrelator,
        store: Arc<JsonStore>,
        keyring: KeyRing,
        owner_email: impl Into<String>,
        backoff: Duration,
        status: StatusHandle,
    ) -> Self {
        Self {
            correlator,
            store,
            keyring,
            owner_email: owner_email.into(),
            backoff,
            status,
            generation: AtomicU64::new(0),
            flight: Mutex::new(()),
        }
    }

    /// Credentials generation; bumped by every completed registration.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Return stored credentials, registering first if there are none.
    pub async fn ensure_registered(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PinCredentials, RegistrationError> {
        let _flight = self.flight.lock().await;
        if let Some(credentials) = CredentialsRepository::new(&self.store).get()? {
            debug!("Pinning credentials already stored");
            return Ok(credentials);
        }
        self.register(cancel).await
    }

    /// Replace revoked credentials. `seen` is the generation the caller
    /// observed when its credentials were rejected.
    pub async fn refresh(
        &self,
        seen: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, RegistrationError> {
        let _flight = self.flight.lock().await;
        let current = self.generation();
        if current != seen {
            debug!(seen, current, "Credentials already refreshed");
            return Ok(current);
        }

        warn!("Pinning credentials revoked; registering again");
        self.register(cancel).await?;
        Ok(self.generation())
    }

    /// Drop stored credentials.
    pub async fn forget(&self) -> Result<(), RegistrationError> {
        let _flight = self.flight.lock().await;
        CredentialsRepository::new(&self.store).clear()?;
        info!("Pinning credentials removed");
        Ok(())
    }

    async fn register(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PinCredentials, RegistrationError> {
        let previous = self.status.current();
        self.status.set(ServiceStatus::Registering);
        let result = self.exchange(cancel).await;
        self.status.set(previous);

        let (credentials, integrator) = result?;
        CredentialsRepository::new(&self.store).save(&credentials, &integrator)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            integrator = %integrator,
            generation,
            "Pinning credentials received and stored"
        );
        Ok(credentials)
    }

    async fn exchange(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(PinCredentials, Address), RegistrationError> {
        let integrator = self.integrator_address(cancel).await?;

        let email = self.owner_email.clone();
        let keyring = self.keyring.clone();
        let recipient = integrator.to_string();
        let envelope = codec::run_blocking(move || {
            codec::encrypt_for(email.as_bytes(), &keyring, [recipient])?.to_json()
        })
        .await?;

        let request = json!({
            "email": envelope,
            "sender_address": self.keyring.address().as_str(),
        });
        debug!(integrator = %integrator, "Sending initialization request");
        let response = self
            .correlator
            .send_with_retry(
                INITIALIZATION_TOPIC,
                CREDENTIALS_RESPONSE_TOPIC,
                &request,
                self.backoff,
                cancel,
            )
            .await?;

        let public = self.open_field(&response, "public", &integrator).await?;
        let secret = self.open_field(&response, "private", &integrator).await?;
        Ok((PinCredentials { public, secret }, integrator))
    }

    async fn integrator_address(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Address, RegistrationError> {
        if let Some(address) = CredentialsRepository::new(&self.store).integrator_address()? {
            return Ok(address);
        }

        let request = json!({ "address": self.keyring.address().as_str() });
        let response = self
            .correlator
            .send_with_retry(
                INTEGRATOR_LOOKUP_TOPIC,
                INTEGRATOR_LOOKUP_TOPIC,
                &request,
                self.backoff,
                cancel,
            )
            .await?;

        let encoded = response
            .get("integrator_address")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RegistrationError::MalformedResponse("missing integrator_address".to_string())
            })?;
        let address = Address::parse(encoded).map_err(CryptoError::from)?;
        info!(integrator = %address, "Integrator address resolved");
        Ok(address)
    }

    async fn open_field(
        &self,
        response: &Value,
        field: &str,
        integrator: &Address,
    ) -> Result<String, RegistrationError> {
        let sealed = response
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| RegistrationError::MalformedResponse(format!("missing {field}")))?
            .to_string();

        let keyring = self.keyring.clone();
        let sender = integrator.clone();
        let plain = codec::run_blocking(move || codec::open_message(&sealed, &keyring, &sender))
            .await?;
        String::from_utf8(plain)
            .map_err(|_| RegistrationError::MalformedResponse(format!("{field} is not UTF-8")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decrypt_as, seal, Envelope};
    use crate::correlator::{scoped_topic, FEEDBACK_TOPIC};
    use crate::storage::StoragePaths;
    use crate::transport::{InMemoryRelay, PublishedMessage};
    use tokio::sync::broadcast;
    use tokio::time::Instant;

    const PEER: &str = "integrator-peer";
    const EMAIL: &str = "owner@example.com";

    struct Harness {
        _dir: tempfile::TempDir,
        relay: Arc<InMemoryRelay>,
        store: Arc<JsonStore>,
        device: KeyRing,
        integrator: KeyRing,
        flow: Arc<RegistrationFlow>,
    }

    fn harness(backoff: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::open(StoragePaths::new(dir.path())).unwrap());
        let relay = Arc::new(InMemoryRelay::new());
        let device = KeyRing::generate().unwrap();
        let integrator = KeyRing::generate().unwrap();
        let correlator = RequestCorrelator::new(relay.clone(), device.address().clone(), PEER);
        let flow = Arc::new(RegistrationFlow::new(
            correlator,
            store.clone(),
            device.clone(),
            EMAIL,
            backoff,
            StatusHandle::new(),
        ));
        Harness {
            _dir: dir,
            relay,
            store,
            device,
            integrator,
            flow,
        }
    }

    async fn next_on(
        published: &mut broadcast::Receiver<PublishedMessage>,
        topic: &str,
    ) -> PublishedMessage {
        loop {
            let message = published.recv().await.unwrap();
            if message.topic == topic {
                return message;
            }
        }
    }

    /// Answers one lookup, rejects `rejections` initialization requests, then
    /// hands out credentials. Returns the arrival time of every init request.
    fn integrator(
        h: &Harness,
        rejections: usize,
        secret: &'static str,
    ) -> tokio::task::JoinHandle<Vec<(Instant, Value)>> {
        let relay = h.relay.clone();
        let device = h.device.address().clone();
        let integrator = h.integrator.clone();
        let mut published = relay.published();
        tokio::spawn(async move {
            let lookup = next_on(&mut published, INTEGRATOR_LOOKUP_TOPIC).await;
            assert_eq!(lookup.payload["address"], device.as_str());
            relay
                .deliver(
                    &scoped_topic(INTEGRATOR_LOOKUP_TOPIC, &device),
                    json!({"integrator_address": integrator.address().as_str()}),
                )
                .await;

            let mut arrivals = Vec::new();
            for round in 0..rejections {
                let init = next_on(&mut published, INITIALIZATION_TOPIC).await;
                arrivals.push((Instant::now(), init.payload));
                relay
                    .deliver(FEEDBACK_TOPIC, json!({"feedback": format!("not ready {round}")}))
                    .await;
            }

            let init = next_on(&mut published, INITIALIZATION_TOPIC).await;
            arrivals.push((Instant::now(), init.payload));
            relay.deliver(FEEDBACK_TOPIC, json!({"feedback": "ok"})).await;
            relay
                .deliver(
                    &scoped_topic(CREDENTIALS_RESPONSE_TOPIC, &device),
                    json!({
                        "public": seal(b"pub-key", &integrator, &device).unwrap(),
                        "private": seal(secret.as_bytes(), &integrator, &device).unwrap(),
                    }),
                )
                .await;
            arrivals
        })
    }

    #[tokio::test]
    async fn registers_and_persists_credentials() {
        let h = harness(Duration::from_millis(20));
        let responder = integrator(&h, 0, "secret-1");

        let credentials = h
            .flow
            .ensure_registered(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(credentials.public, "pub-key");
        assert_eq!(credentials.secret, "secret-1");
        assert_eq!(h.flow.generation(), 1);

        let repo = CredentialsRepository::new(&h.store);
        assert_eq!(repo.get().unwrap(), Some(credentials));
        assert_eq!(
            repo.integrator_address().unwrap().as_ref(),
            Some(h.integrator.address())
        );

        // The integrator can read the identity token.
        let arrivals = responder.await.unwrap();
        let request = &arrivals[0].1;
        assert_eq!(request["sender_address"], h.device.address().as_str());
        let envelope = Envelope::from_json(request["email"].as_str().unwrap()).unwrap();
        assert!(envelope.is_recipient(h.integrator.address()));
        let email = decrypt_as(&envelope, &h.integrator, h.device.address()).unwrap();
        assert_eq!(email, EMAIL.as_bytes());

        assert!(h.relay.active_topics().await.is_empty());
    }

    #[tokio::test]
    async fn stored_credentials_skip_the_exchange() {
        let h = harness(Duration::from_millis(20));
        let stored = PinCredentials {
            public: "p".into(),
            secret: "s".into(),
        };
        CredentialsRepository::new(&h.store)
            .save(&stored, h.integrator.address())
            .unwrap();

        let mut published = h.relay.published();
        let credentials = h
            .flow
            .ensure_registered(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(credentials, stored);
        assert!(published.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_initialization_is_resent_after_backoff() {
        let backoff = Duration::from_millis(80);
        let h = harness(backoff);
        let responder = integrator(&h, 3, "secret-1");

        h.flow
            .ensure_registered(&CancellationToken::new())
            .await
            .unwrap();

        let arrivals = responder.await.unwrap();
        assert_eq!(arrivals.len(), 4);
        for pair in arrivals.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= backoff);
            // Every resend carries the same sender.
            assert_eq!(pair[0].1["sender_address"], pair[1].1["sender_address"]);
        }
    }

    #[tokio::test]
    async fn concurrent_refreshes_register_once() {
        let h = harness(Duration::from_millis(20));
        CredentialsRepository::new(&h.store)
            .save(
                &PinCredentials {
                    public: "old".into(),
                    secret: "revoked".into(),
                },
                h.integrator.address(),
            )
            .unwrap();

        // The integrator address is already known, so only an init is sent.
        let relay = h.relay.clone();
        let device = h.device.address().clone();
        let integrator = h.integrator.clone();
        let mut published = relay.published();
        let responder = tokio::spawn(async move {
            next_on(&mut published, INITIALIZATION_TOPIC).await;
            relay
                .deliver(
                    &scoped_topic(CREDENTIALS_RESPONSE_TOPIC, &device),
                    json!({
                        "public": seal(b"new", &integrator, &device).unwrap(),
                        "private": seal(b"fresh", &integrator, &device).unwrap(),
                    }),
                )
                .await;
            // Any second init request would show up here.
            tokio::time::timeout(Duration::from_millis(150), async {
                next_on(&mut published, INITIALIZATION_TOPIC).await
            })
            .await
            .is_err()
        });

        let seen = h.flow.generation();
        let cancel = CancellationToken::new();
        let (a, b) = tokio::join!(h.flow.refresh(seen, &cancel), h.flow.refresh(seen, &cancel));
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert!(responder.await.unwrap(), "second initialization was sent");

        let stored = CredentialsRepository::new(&h.store).get().unwrap().unwrap();
        assert_eq!(stored.secret, "fresh");
    }

    #[tokio::test]
    async fn forget_clears_credentials() {
        let h = harness(Duration::from_millis(20));
        CredentialsRepository::new(&h.store)
            .save(
                &PinCredentials {
                    public: "p".into(),
                    secret: "s".into(),
                },
                h.integrator.address(),
            )
            .unwrap();
        h.flow.forget().await.unwrap();
        assert!(!CredentialsRepository::new(&h.store).exists().unwrap());
    }

    #[tokio::test]
    async fn cancellation_aborts_registration() {
        let h = harness(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = h.flow.ensure_registered(&cancel).await.unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Transport(TransportError::Cancelled)
        ));
        assert!(h.relay.active_topics().await.is_empty());
    }
}
