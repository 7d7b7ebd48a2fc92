// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pipeline-level error.

use crate::codec::CryptoError;
use crate::config::ConfigError;
use crate::ledger::LedgerError;
use crate::pinning::PinError;
use crate::registration::RegistrationError;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// Everything that can end a report's journey.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Relay failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Pinning failed: {0}")]
    Pin(#[from] PinError),

    #[error("Ledger write failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Reading report files failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid picture attachment: {0}")]
    InvalidAttachment(String),

    #[error("No integrator address known; registration has not completed")]
    NotRegistered,

    #[error("Report {0} was not acknowledged")]
    NoAcknowledgement(String),
}

impl ReportError {
    /// Short text suitable for a host notification.
    pub fn notification(&self) -> String {
        match self {
            ReportError::Pin(PinError::CredentialsRevoked) | ReportError::Registration(_) => {
                "The report could not be uploaded: storage credentials are unavailable.".to_string()
            }
            ReportError::Pin(_) => "The report could not be uploaded.".to_string(),
            ReportError::Transport(_) | ReportError::NoAcknowledgement(_) => {
                "The report could not be delivered to the support service.".to_string()
            }
            ReportError::Ledger(_) => "The report proof could not be recorded.".to_string(),
            other => format!("The report could not be prepared: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_errors_convert() {
        let err: ReportError = PinError::CredentialsRevoked.into();
        assert!(matches!(err, ReportError::Pin(PinError::CredentialsRevoked)));

        let err: ReportError = LedgerError::Timeout.into();
        assert_eq!(err.to_string(), "Ledger write failed: Ledger endpoint timed out");
    }

    #[test]
    fn notifications_do_not_leak_details() {
        let err = ReportError::Transport(TransportError::Rejected("peer 12D3 unreachable".into()));
        assert!(!err.notification().contains("12D3"));

        let err = ReportError::NoAcknowledgement("42".into());
        assert_eq!(
            err.notification(),
            "The report could not be delivered to the support service."
        );
    }
}
