// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Reports
//!
//! A report moves through these steps:
//!
//! 1. the request is bundled and encrypted ([`bundle`])
//! 2. the bundle is pinned, or for repeated problems sent inline
//! 3. content ids go to the integrator through the [`channel`]
//! 4. the acknowledgement decides whether a ledger write follows
//!    ([`orchestrator`])
//!
//! ## Report lifecycle
//!
//! ```text
//! AwaitingStorageCredentials → AwaitingAcknowledgement → Done
//!            └──────────────── dropped on failure ───────┘
//! ```

pub mod bundle;
pub mod channel;
pub mod orchestrator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::pinning::{looks_like_content_id, ContentIds};
use crate::sources::ProblemEvent;

pub use bundle::{DESCRIPTION_FILE_NAME, LOGS_MAX_LEN, LOG_FILE_NAME, TRACES_FILE_NAME};
pub use channel::{Acknowledgement, ReportChannel};
pub use orchestrator::{OrchestratorEvent, ReportOrchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    AwaitingStorageCredentials,
    AwaitingAcknowledgement,
    Done,
}

/// What was sent to the integrator for a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "files", rename_all = "snake_case")]
pub enum ReportPayload {
    /// Files pinned to content-addressed storage: filename → content id.
    Pinned(ContentIds),
    /// Description only, sealed inline: filename → sealed value.
    Inline(ContentIds),
}

impl ReportPayload {
    pub fn files(&self) -> &ContentIds {
        match self {
            ReportPayload::Pinned(files) | ReportPayload::Inline(files) => files,
        }
    }

    /// Whether log files were pinned with this report.
    pub fn has_logs(&self) -> bool {
        matches!(self, ReportPayload::Pinned(files) if files.contains_key(LOG_FILE_NAME))
    }

    /// Content ids to release if the report is abandoned.
    pub fn content_ids(&self) -> ContentIds {
        self.files()
            .iter()
            .filter(|(_, value)| looks_like_content_id(value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

/// A report the orchestrator is tracking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub payload: Option<ReportPayload>,
    pub description: Value,
}

impl ReportRecord {
    pub fn new(description: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            status: ReportStatus::AwaitingStorageCredentials,
            payload: None,
            description,
        }
    }
}

/// A request to send a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Free text or a structured problem description.
    pub description: Value,
    /// Send the description alone, without logs or attachments.
    #[serde(default)]
    pub only_description: bool,
    /// Pictures as data URLs (`data:image/png;base64,...`).
    #[serde(default)]
    pub pictures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl ReportRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: Value::String(description.into()),
            ..Default::default()
        }
    }

    /// Document placed in `issue_description.json`.
    pub fn description_document(&self) -> Value {
        let mut document = json!({ "description": self.description });
        if let Some(phone) = &self.phone_number {
            document["phone_number"] = json!(phone);
        }
        if !self.pictures.is_empty() {
            document["pictures_count"] = json!(self.pictures.len());
        }
        document
    }
}

impl From<&ProblemEvent> for ReportRequest {
    fn from(event: &ProblemEvent) -> Self {
        Self {
            description: event.to_description(),
            only_description: event.repeated,
            pictures: Vec::new(),
            phone_number: None,
        }
    }
}
