// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Report Orchestrator
//!
//! Drives one report from request to completion:
//!
//! ```text
//! request ─► bundle + encrypt ─► pin (re-register once on revoked key)
//!         ─► /report ─► acknowledgement
//!                        ├─ datalog = false ─► Done
//!                        └─ datalog = true  ─► ledger write ─► Done
//! ```
//!
//! Repeated problems skip pinning and send the sealed description inline.
//! When such a report is later asked for a ledger write, the full bundle is
//! built and pinned at that point and written together with the ticket ids.
//!
//! Any failure releases what was pinned for the report, drops the report
//! and emits [`OrchestratorEvent::Dropped`] carrying a user-facing notice.
//! The orchestrator itself never stops on a failed report.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bundle;
use super::{ReportChannel, ReportPayload, ReportRecord, ReportRequest, ReportStatus};
use crate::error::ReportError;
use crate::keys::{Address, KeyRing};
use crate::ledger::rws::{wait_for_membership, DeviceDirectory};
use crate::ledger::{SubmissionQueue, WriteOutcome};
use crate::pinning::{unpin_best_effort, ContentIds, FileBlob, PinError, PinStore};
use crate::registration::RegistrationFlow;
use crate::sources::ProblemReceiver;
use crate::status::{ServiceStatus, StatusHandle};
use crate::storage::{CredentialsRepository, JsonStore};

const EVENT_CAPACITY: usize = 64;

/// Progress notifications for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Accepted { report_id: String },
    Acknowledged { report_id: String, ledger_write: bool },
    Done { report_id: String },
    Dropped { report_id: String, notification: String },
}

/// Components the orchestrator drives.
pub struct OrchestratorParts {
    pub keyring: KeyRing,
    pub store: Arc<JsonStore>,
    pub pins: Arc<dyn PinStore>,
    pub registration: Arc<RegistrationFlow>,
    pub channel: ReportChannel,
    pub queue: SubmissionQueue,
    pub status: StatusHandle,
}

type ReportTable = Arc<Mutex<HashMap<String, ReportRecord>>>;

pub struct ReportOrchestrator {
    keyring: KeyRing,
    store: Arc<JsonStore>,
    pins: Arc<dyn PinStore>,
    registration: Arc<RegistrationFlow>,
    channel: ReportChannel,
    queue: SubmissionQueue,
    status: StatusHandle,
    reports: ReportTable,
    events: broadcast::Sender<OrchestratorEvent>,
    shutdown: CancellationToken,
}

impl ReportOrchestrator {
    pub fn new(parts: OrchestratorParts, shutdown: CancellationToken) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            keyring: parts.keyring,
            store: parts.store,
            pins: parts.pins,
            registration: parts.registration,
            channel: parts.channel,
            queue: parts.queue,
            status: parts.status,
            reports: Arc::new(Mutex::new(HashMap::new())),
            events,
            shutdown,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Reports accepted but not yet finished, oldest first.
    pub async fn pending_reports(&self) -> Vec<ReportRecord> {
        let mut records: Vec<ReportRecord> = self.reports.lock().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Make sure storage credentials exist, then mark the service ready.
    pub async fn start(&self) -> Result<(), ReportError> {
        self.registration.ensure_registered(&self.shutdown).await?;
        self.status.set(ServiceStatus::Ready);
        info!(sender = %self.keyring.address(), "Report service ready");
        Ok(())
    }

    /// Block until this device may write to `owner`'s ledger subscription.
    pub async fn wait_for_subscription(
        &self,
        directory: &dyn DeviceDirectory,
        owner: &Address,
    ) -> Result<bool, ReportError> {
        self.status.set(ServiceStatus::AwaitingSubscription);
        let joined =
            wait_for_membership(directory, owner, self.keyring.address(), &self.shutdown).await?;
        if joined {
            self.status.set(ServiceStatus::Ready);
        }
        Ok(joined)
    }

    /// Turn problem events into reports until shutdown. Each report runs as
    /// its own task.
    pub async fn listen(self: Arc<Self>, mut problems: ProblemReceiver) {
        info!("Listening for problem events");
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = problems.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            debug!(kind = ?event.kind, source = %event.source, repeated = event.repeated, "Problem event");
            let request = ReportRequest::from(&event);
            let orchestrator = self.clone();
            tokio::spawn(async move {
                // Failures are logged and broadcast by `submit`.
                let _ = orchestrator.submit(request).await;
            });
        }
        self.status.set(ServiceStatus::Stopped);
        info!("Problem listener stopped");
    }

    /// Send one report. Returns once the integrator acknowledged it; a
    /// requested ledger write continues in the background.
    pub async fn submit(&self, request: ReportRequest) -> Result<String, ReportError> {
        let record = ReportRecord::new(request.description.clone());
        let report_id = record.id.clone();
        self.reports.lock().await.insert(report_id.clone(), record);
        self.emit(OrchestratorEvent::Accepted {
            report_id: report_id.clone(),
        });
        info!(report_id = %report_id, only_description = request.only_description, "Report accepted");

        let payload = match self.prepare(&request).await {
            Ok(payload) => payload,
            Err(e) => return Err(self.abandon(&report_id, None, e).await),
        };
        self.update(&report_id, |record| {
            record.payload = Some(payload.clone());
            record.status = ReportStatus::AwaitingAcknowledgement;
        })
        .await;

        let ack = match self.channel.submit(&report_id, payload.files()).await {
            Ok(ack) => ack,
            Err(e) => return Err(self.abandon(&report_id, Some(&payload), e).await),
        };
        self.emit(OrchestratorEvent::Acknowledged {
            report_id: report_id.clone(),
            ledger_write: ack.requires_ledger_write,
        });

        if !ack.requires_ledger_write {
            self.finish(&report_id).await;
            debug!(report_id = %report_id, "Report finished without ledger write");
            return Ok(report_id);
        }

        let (ledger_payload, compensation) =
            match self.ledger_payload(&request, &payload, &ack.ticket_ids).await {
                Ok(prepared) => prepared,
                Err(e) => return Err(self.abandon(&report_id, None, e).await),
            };

        let pending = self.queue.enqueue(ledger_payload, compensation);
        let reports = self.reports.clone();
        let events = self.events.clone();
        let id = report_id.clone();
        tokio::spawn(async move {
            let outcome = pending.await;
            reports.lock().await.remove(&id);
            let event = match outcome {
                WriteOutcome::Committed(_) => OrchestratorEvent::Done { report_id: id },
                WriteOutcome::Failed(e) => {
                    error!(report_id = %id, error = %e, "Report dropped after ledger failure");
                    OrchestratorEvent::Dropped {
                        report_id: id,
                        notification: ReportError::from(e).notification(),
                    }
                }
            };
            let _ = events.send(event);
        });

        Ok(report_id)
    }

    async fn prepare(&self, request: &ReportRequest) -> Result<ReportPayload, ReportError> {
        let integrator = self.integrator().await?;
        if request.only_description {
            let files = bundle::inline_description(&self.keyring, &integrator, request).await?;
            return Ok(ReportPayload::Inline(files));
        }

        let bundle =
            bundle::build(self.store.paths(), &self.keyring, &integrator, request).await?;
        let files = self.pin_with_refresh(bundle.files()).await?;
        Ok(ReportPayload::Pinned(files))
    }

    /// What goes to the ledger, and what to unpin if that write fails.
    async fn ledger_payload(
        &self,
        request: &ReportRequest,
        payload: &ReportPayload,
        ticket_ids: &[Value],
    ) -> Result<(String, ContentIds), ReportError> {
        if payload.has_logs() {
            let body = ledger_record(payload.files(), ticket_ids);
            return Ok((body, payload.content_ids()));
        }

        debug!("Report has no pinned logs; collecting them for the ledger record");
        let full = ReportRequest {
            only_description: false,
            ..request.clone()
        };
        let integrator = self.integrator().await?;
        let bundle = bundle::build(self.store.paths(), &self.keyring, &integrator, &full).await?;
        let files = self.pin_with_refresh(bundle.files()).await?;

        let body = ledger_record(&files, ticket_ids);
        Ok((body, files))
    }

    async fn integrator(&self) -> Result<Address, ReportError> {
        if let Some(address) = CredentialsRepository::new(&self.store).integrator_address()? {
            return Ok(address);
        }
        self.registration.ensure_registered(&self.shutdown).await?;
        CredentialsRepository::new(&self.store)
            .integrator_address()?
            .ok_or(ReportError::NotRegistered)
    }

    /// Pin `files`; on revoked credentials register again and retry once.
    async fn pin_with_refresh(&self, files: &[FileBlob]) -> Result<ContentIds, ReportError> {
        self.registration.ensure_registered(&self.shutdown).await?;
        let seen = self.registration.generation();

        match self.pins.pin(files).await {
            Err(PinError::CredentialsRevoked) => {
                self.registration.refresh(seen, &self.shutdown).await?;
                info!("Retrying pin with refreshed credentials");
                Ok(self.pins.pin(files).await?)
            }
            other => Ok(other?),
        }
    }

    async fn update(&self, report_id: &str, change: impl FnOnce(&mut ReportRecord)) {
        if let Some(record) = self.reports.lock().await.get_mut(report_id) {
            change(record);
        }
    }

    async fn finish(&self, report_id: &str) {
        self.update(report_id, |record| record.status = ReportStatus::Done)
            .await;
        self.reports.lock().await.remove(report_id);
        self.emit(OrchestratorEvent::Done {
            report_id: report_id.to_string(),
        });
    }

    /// Release pinned content, forget the report and tell the host.
    async fn abandon(
        &self,
        report_id: &str,
        payload: Option<&ReportPayload>,
        error: ReportError,
    ) -> ReportError {
        if let Some(payload) = payload {
            let released = unpin_best_effort(self.pins.as_ref(), &payload.content_ids()).await;
            if released > 0 {
                warn!(report_id = %report_id, released, "Released pinned report content");
            }
        }
        self.reports.lock().await.remove(report_id);
        error!(report_id = %report_id, error = %error, "Report dropped");
        self.emit(OrchestratorEvent::Dropped {
            report_id: report_id.to_string(),
            notification: error.notification(),
        });
        error
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Ledger record body: filename → content id, plus the integrator's tickets.
fn ledger_record(files: &ContentIds, ticket_ids: &[Value]) -> String {
    let mut body: serde_json::Map<String, Value> = files
        .iter()
        .map(|(name, cid)| (name.clone(), Value::String(cid.clone())))
        .collect();
    body.insert("ticket_ids".to_string(), Value::Array(ticket_ids.to_vec()));
    Value::Object(body).to_string()
}
