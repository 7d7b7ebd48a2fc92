// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Problem Sources
//!
//! The host pushes [`ProblemEvent`]s into a channel and the orchestrator turns
//! each one into a report. Events come from two places:
//!
//! - host log records at `WARNING` level or above ([`ProblemEvent::from_log_record`])
//! - periodic device checks listing unavailable or stale devices
//!   ([`ProblemEvent::from_device_check`])
//!
//! Log records emitted by this crate itself are ignored so a failing report
//! cannot trigger another report.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Target prefix of this crate's own log records.
pub const OWN_LOG_TARGET: &str = "report_courier";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemKind {
    #[serde(rename = "unresponded_devices")]
    UnrespondedDevices,
    #[serde(rename = "errors")]
    Errors,
    #[serde(rename = "warnings")]
    Warnings,
}

impl ProblemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemKind::UnrespondedDevices => "unresponded_devices",
            ProblemKind::Errors => "errors",
            ProblemKind::Warnings => "warnings",
        }
    }
}

/// A host log record as seen by the problem source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Logger name (module path).
    pub name: String,
    pub level: String,
    pub message: String,
    /// `file:line` the record was emitted from.
    pub source: String,
    /// How many times the host has seen a record from this source.
    #[serde(default = "one")]
    pub count: u32,
}

fn one() -> u32 {
    1
}

/// Devices and loose entities found in one state during a device check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroup {
    /// `(device name, entity ids)` pairs.
    pub devices: Vec<(String, Vec<String>)>,
    /// Entities not attached to any device.
    pub entities: Vec<String>,
}

impl DeviceGroup {
    fn render(&self, heading: &str) -> String {
        let mut text = format!("{heading}\nDevices:\n");
        for (device, entities) in &self.devices {
            let _ = writeln!(text, "   * {device}");
            text.push_str("   * Entities:\n");
            for entity in entities {
                let _ = writeln!(text, "       * {entity}");
            }
        }
        if !self.entities.is_empty() {
            text.push_str("Entities without devices:\n");
            for entity in &self.entities {
                let _ = writeln!(text, "   * {entity}");
            }
        }
        text
    }
}

/// A problem worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemEvent {
    pub description: String,
    pub kind: ProblemKind,
    pub source: String,
    /// Seen before; reported as a description only, without logs.
    pub repeated: bool,
}

impl ProblemEvent {
    /// Build an event from a host log record. Returns `None` for records below
    /// `WARNING` and for this crate's own records.
    pub fn from_log_record(record: &LogRecord) -> Option<Self> {
        if record.name.contains(OWN_LOG_TARGET) {
            return None;
        }
        let kind = match record.level.to_ascii_uppercase().as_str() {
            "ERROR" | "CRITICAL" => ProblemKind::Errors,
            "WARNING" => ProblemKind::Warnings,
            _ => return None,
        };
        Some(Self {
            description: format!("{} - {}: {}", record.name, record.level, record.message),
            kind,
            source: record.source.clone(),
            repeated: record.count > 1,
        })
    }

    pub fn from_device_check(unavailable: &DeviceGroup, not_updated: &DeviceGroup) -> Self {
        let description = format!(
            "{}\n{}",
            unavailable.render("unavailables"),
            not_updated.render("not updated")
        );
        Self {
            description,
            kind: ProblemKind::UnrespondedDevices,
            source: "devices".to_string(),
            repeated: false,
        }
    }

    /// Structured description placed in the report.
    pub fn to_description(&self) -> Value {
        json!({
            "description": self.description,
            "type": self.kind.as_str(),
            "source": self.source,
        })
    }
}

pub type ProblemSender = mpsc::Sender<ProblemEvent>;
pub type ProblemReceiver = mpsc::Receiver<ProblemEvent>;

/// Channel feeding problem events to the orchestrator.
pub fn problem_channel(capacity: usize) -> (ProblemSender, ProblemReceiver) {
    mpsc::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, level: &str, count: u32) -> LogRecord {
        LogRecord {
            name: name.into(),
            level: level.into(),
            message: "Update failed".into(),
            source: "components/zha/core.py:120".into(),
            count,
        }
    }

    #[test]
    fn errors_and_warnings_become_events() {
        let event = ProblemEvent::from_log_record(&record("homeassistant.zha", "ERROR", 1)).unwrap();
        assert_eq!(event.kind, ProblemKind::Errors);
        assert_eq!(event.description, "homeassistant.zha - ERROR: Update failed");
        assert!(!event.repeated);

        let event =
            ProblemEvent::from_log_record(&record("homeassistant.zha", "CRITICAL", 3)).unwrap();
        assert_eq!(event.kind, ProblemKind::Errors);
        assert!(event.repeated);

        let event =
            ProblemEvent::from_log_record(&record("homeassistant.zha", "WARNING", 1)).unwrap();
        assert_eq!(event.kind, ProblemKind::Warnings);
    }

    #[test]
    fn low_levels_and_own_records_are_ignored() {
        assert!(ProblemEvent::from_log_record(&record("homeassistant.zha", "INFO", 1)).is_none());
        assert!(
            ProblemEvent::from_log_record(&record("report_courier::ledger", "ERROR", 1)).is_none()
        );
    }

    #[test]
    fn description_shape() {
        let event = ProblemEvent::from_log_record(&record("hass", "ERROR", 1)).unwrap();
        assert_eq!(
            event.to_description(),
            json!({
                "description": "hass - ERROR: Update failed",
                "type": "errors",
                "source": "components/zha/core.py:120",
            })
        );
    }

    #[test]
    fn device_check_lists_devices_and_loose_entities() {
        let unavailable = DeviceGroup {
            devices: vec![("Kitchen plug".into(), vec!["switch.kitchen".into()])],
            entities: vec!["sensor.orphan".into()],
        };
        let event = ProblemEvent::from_device_check(&unavailable, &DeviceGroup::default());
        assert_eq!(event.kind, ProblemKind::UnrespondedDevices);
        assert_eq!(event.source, "devices");
        assert_eq!(
            event.description,
            "unavailables\nDevices:\n   * Kitchen plug\n   * Entities:\n       * switch.kitchen\n\
             Entities without devices:\n   * sensor.orphan\n\nnot updated\nDevices:\n"
        );
    }
}
