// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Service Assembly
//!
//! Wires the pipeline together from [`CourierConfig`]:
//!
//! ```text
//! JsonStore ─► account seed ─► WsLink ─► RegistrationFlow ─┐
//!           └─► PinataPinStore ─► SubmissionQueue/worker ──┴─► ReportOrchestrator
//! ```
//!
//! [`Courier::run`] registers, then feeds problem events to the orchestrator
//! until the stop future resolves. Stopping forgets the storage credentials
//! and cancels every background task.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::CryptoError;
use crate::config::CourierConfig;
use crate::correlator::RequestCorrelator;
use crate::error::ReportError;
use crate::keys::{Address, KeyRing};
use crate::ledger::{EndpointRing, Ledger, SubmissionQueue, SubmissionSettings, SubmissionWorker};
use crate::pinning::{PinStore, PinataPinStore};
use crate::registration::RegistrationFlow;
use crate::report::{ReportChannel, ReportOrchestrator};
use crate::report::orchestrator::OrchestratorParts;
use crate::sources::ProblemReceiver;
use crate::status::{ServiceStatus, StatusHandle};
use crate::storage::{AccountRecord, AccountRepository, JsonStore, StoragePaths};
use crate::transport::{TransportLink, WsLink};

/// The assembled report service.
pub struct Courier {
    keyring: KeyRing,
    registration: Arc<RegistrationFlow>,
    orchestrator: Arc<ReportOrchestrator>,
    worker: SubmissionWorker,
    shutdown: CancellationToken,
}

impl Courier {
    /// Build the service against the configured relay and Pinata.
    pub fn from_config(
        config: &CourierConfig,
        ledger: Arc<dyn Ledger>,
    ) -> Result<Self, ReportError> {
        let shutdown = CancellationToken::new();
        let store = Self::open_store(config)?;
        let link = Arc::new(WsLink::with_shutdown(
            config.relay_url.clone(),
            shutdown.child_token(),
        ));
        let pins = Arc::new(PinataPinStore::new(
            config.pinata_api_url.clone(),
            store.clone(),
        )?);
        Self::assemble(config, store, link, pins, ledger, shutdown)
    }

    pub fn open_store(config: &CourierConfig) -> Result<Arc<JsonStore>, ReportError> {
        Ok(Arc::new(JsonStore::open(StoragePaths::new(&config.data_dir))?))
    }

    /// Build the service from already constructed backends.
    pub fn assemble(
        config: &CourierConfig,
        store: Arc<JsonStore>,
        link: Arc<dyn TransportLink>,
        pins: Arc<dyn PinStore>,
        ledger: Arc<dyn Ledger>,
        shutdown: CancellationToken,
    ) -> Result<Self, ReportError> {
        let owner_email = config.require_owner_email()?.to_string();
        let account = load_account(&store, config.sender_seed.as_deref(), &owner_email)?;
        let keyring = account.keyring().map_err(CryptoError::from)?;

        // Ledger writes are paid by the owner's subscription once known.
        let delegate = match &account.owner_address {
            Some(owner) => Address::parse(owner).map_err(CryptoError::from)?,
            None => keyring.address().clone(),
        };

        let status = StatusHandle::new();
        let registration = Arc::new(RegistrationFlow::new(
            RequestCorrelator::new(
                link.clone(),
                keyring.address().clone(),
                config.integrator_peer_id.clone(),
            ),
            store.clone(),
            keyring.clone(),
            owner_email,
            config.registration_backoff,
            status.clone(),
        ));
        let channel = ReportChannel::new(
            link,
            keyring.address().clone(),
            config.integrator_peer_id.clone(),
            config.ack_timeout,
        );
        let settings = SubmissionSettings {
            congestion_cooldown: config.congestion_cooldown,
            ..SubmissionSettings::default()
        };
        let (queue, worker) = SubmissionQueue::new(
            ledger,
            pins.clone(),
            EndpointRing::new(config.ledger_endpoints.clone())?,
            delegate,
            settings,
        );

        let orchestrator = Arc::new(ReportOrchestrator::new(
            OrchestratorParts {
                keyring: keyring.clone(),
                store,
                pins,
                registration: registration.clone(),
                channel,
                queue,
                status,
            },
            shutdown.clone(),
        ));

        info!(
            sender = %keyring.address(),
            relay = %config.relay_url,
            endpoints = config.ledger_endpoints.len(),
            "Report courier assembled"
        );

        Ok(Self {
            keyring,
            registration,
            orchestrator,
            worker,
            shutdown,
        })
    }

    pub fn keyring(&self) -> &KeyRing {
        &self.keyring
    }

    pub fn orchestrator(&self) -> &Arc<ReportOrchestrator> {
        &self.orchestrator
    }

    /// Register, then turn problem events into reports until `stop` resolves.
    pub async fn run<F>(self, problems: ProblemReceiver, stop: F) -> Result<(), ReportError>
    where
        F: Future<Output = ()>,
    {
        let Courier {
            registration,
            orchestrator,
            worker,
            shutdown,
            ..
        } = self;

        let worker_task = tokio::spawn(worker.run(shutdown.clone()));
        tokio::pin!(stop);

        let started = tokio::select! {
            started = orchestrator.start() => Some(started),
            _ = &mut stop => None,
        };

        let result = match started {
            Some(Ok(())) => {
                let listener = tokio::spawn(orchestrator.clone().listen(problems));
                stop.await;
                info!("Stop requested");
                shutdown.cancel();
                if let Err(e) = listener.await {
                    warn!(error = %e, "Problem listener task failed");
                }
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => {
                info!("Stop requested before registration completed");
                Ok(())
            }
        };

        shutdown.cancel();
        if let Err(e) = registration.forget().await {
            warn!(error = %e, "Failed to remove pinning credentials");
        }
        if let Err(e) = worker_task.await {
            warn!(error = %e, "Submission worker task failed");
        }
        orchestrator.status().set(ServiceStatus::Stopped);
        info!("Report courier stopped");
        result
    }
}

/// A configured seed wins over the stored one and is persisted; otherwise the
/// stored account is used, or a new one is created.
fn load_account(
    store: &JsonStore,
    configured_seed: Option<&str>,
    owner_email: &str,
) -> Result<AccountRecord, ReportError> {
    let accounts = AccountRepository::new(store);
    let Some(seed) = configured_seed else {
        return Ok(accounts.bootstrap(Some(owner_email.to_string()))?);
    };

    match accounts.get()? {
        Some(existing) if existing.sender_seed == seed => Ok(existing),
        _ => {
            let record = AccountRecord {
                sender_seed: seed.to_string(),
                owner_email: Some(owner_email.to_string()),
                owner_address: None,
                created_at: Utc::now(),
            };
            accounts.save(&record)?;
            Ok(record)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, DATA_DIR_ENV, OWNER_EMAIL_ENV, SENDER_SEED_ENV};
    use crate::ledger::InMemoryLedger;
    use crate::pinning::InMemoryPinStore;
    use crate::sources::problem_channel;
    use crate::storage::{CredentialsRepository, PinCredentials};
    use crate::transport::InMemoryRelay;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn config(dir: &std::path::Path, vars: &[(&str, &str)]) -> CourierConfig {
        let mut env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.insert(DATA_DIR_ENV.to_string(), dir.display().to_string());
        CourierConfig::from_lookup(|name| env.get(name).cloned()).unwrap()
    }

    fn assemble(config: &CourierConfig, store: Arc<JsonStore>) -> Result<Courier, ReportError> {
        Courier::assemble(
            config,
            store,
            Arc::new(InMemoryRelay::new()),
            Arc::new(InMemoryPinStore::new()),
            Arc::new(InMemoryLedger::new()),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn run_registers_and_forgets_credentials_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &[(OWNER_EMAIL_ENV, "owner@example.com")]);
        let store = Courier::open_store(&config).unwrap();
        let integrator = KeyRing::generate().unwrap();
        CredentialsRepository::new(&store)
            .save(
                &PinCredentials {
                    public: "pub".into(),
                    secret: "secret".into(),
                },
                integrator.address(),
            )
            .unwrap();

        let courier = assemble(&config, store.clone()).unwrap();
        let account = AccountRepository::new(&store).get().unwrap().unwrap();
        assert_eq!(account.keyring().unwrap().address(), courier.keyring().address());

        let mut status = courier.orchestrator().status().subscribe();
        let (_problems, receiver) = problem_channel(4);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(courier.run(receiver, async {
            let _ = stop_rx.await;
        }));

        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| *s == ServiceStatus::Ready),
        )
        .await
        .unwrap()
        .unwrap();

        stop_tx.send(()).unwrap();
        running.await.unwrap().unwrap();

        assert_eq!(*status.borrow(), ServiceStatus::Stopped);
        assert!(CredentialsRepository::new(&store).get().unwrap().is_none());
    }

    #[tokio::test]
    async fn configured_seed_replaces_stored_account() {
        let dir = tempfile::tempdir().unwrap();
        let seed = KeyRing::generate().unwrap();
        let config = config(
            dir.path(),
            &[
                (OWNER_EMAIL_ENV, "owner@example.com"),
                (SENDER_SEED_ENV, seed.phrase()),
            ],
        );
        let store = Courier::open_store(&config).unwrap();
        AccountRepository::new(&store)
            .bootstrap(Some("owner@example.com".into()))
            .unwrap();

        let courier = assemble(&config, store.clone()).unwrap();
        assert_eq!(courier.keyring().address(), seed.address());

        let stored = AccountRepository::new(&store).get().unwrap().unwrap();
        assert_eq!(stored.sender_seed, seed.phrase());
    }

    #[tokio::test]
    async fn missing_owner_email_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &[]);
        let store = Courier::open_store(&config).unwrap();

        let result = assemble(&config, store);
        assert!(matches!(
            result,
            Err(ReportError::Config(ConfigError::Missing(name))) if name == OWNER_EMAIL_ENV
        ));
    }
}
