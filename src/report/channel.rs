// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Report delivery to the integrator.
//!
//! Request on `/report`:
//!
//! ```json
//! {"report": {"<file>": "<content id>"}, "address": "<sender>", "id": "<report id>"}
//! ```
//!
//! Acknowledgement on `/reportResponse/{sender}`:
//!
//! ```json
//! {"id": "<report id>", "datalog": true, "ticket_ids": [..]}
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::{REPORT_RESPONSE_TOPIC, REPORT_TOPIC};
use crate::correlator::KeyedCorrelator;
use crate::error::ReportError;
use crate::keys::Address;
use crate::pinning::ContentIds;
use crate::transport::{TransportError, TransportLink};

/// The integrator's answer to a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    #[serde(rename = "datalog")]
    pub requires_ledger_write: bool,
    #[serde(default)]
    pub ticket_ids: Vec<Value>,
}

pub struct ReportChannel {
    correlator: KeyedCorrelator,
    sender: Address,
}

impl ReportChannel {
    pub fn new(
        link: Arc<dyn TransportLink>,
        sender: Address,
        target_peer: impl Into<String>,
        ack_timeout: Duration,
    ) -> Self {
        let correlator = KeyedCorrelator::new(
            link,
            sender.clone(),
            target_peer,
            REPORT_RESPONSE_TOPIC,
            ack_timeout,
        );
        Self { correlator, sender }
    }

    /// Reports currently waiting for an acknowledgement.
    pub async fn in_flight(&self) -> usize {
        self.correlator.outstanding().await
    }

    /// Send the report's files and wait for the acknowledgement. Not retried.
    pub async fn submit(
        &self,
        report_id: &str,
        files: &ContentIds,
    ) -> Result<Acknowledgement, ReportError> {
        let message = json!({
            "report": files,
            "address": self.sender.as_str(),
            "id": report_id,
        });
        debug!(report_id = %report_id, files = files.len(), "Sending report");

        let response = match self
            .correlator
            .send_and_await(REPORT_TOPIC, &message, report_id)
            .await
        {
            Ok(response) => response,
            Err(TransportError::Timeout(_)) => {
                return Err(ReportError::NoAcknowledgement(report_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let ack: Acknowledgement = serde_json::from_value(response)
            .map_err(|e| TransportError::InvalidMessage(format!("acknowledgement: {e}")))?;
        info!(
            report_id = %report_id,
            ledger_write = ack.requires_ledger_write,
            tickets = ack.ticket_ids.len(),
            "Report acknowledged"
        );
        Ok(ack)
    }
}
