// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, protocol constants and their defaults.
//! Configuration is loaded from the environment once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `COURIER_SENDER_SEED` | Device account seed (mnemonic or `0x` hex) | Required for networked use |
//! | `COURIER_OWNER_EMAIL` | Identity token sent at registration | Required for registration |
//! | `COURIER_DATA_DIR` | Directory for persisted state | `/data` |
//! | `COURIER_RELAY_URL` | libp2p proxy WebSocket | `ws://127.0.0.1:8888` |
//! | `COURIER_INTEGRATOR_PEER_ID` | Integrator libp2p peer id | built in |
//! | `COURIER_LEDGER_ENDPOINTS` | Comma-separated ledger RPC endpoints | three public nodes |
//! | `COURIER_PINATA_API_URL` | Pinning API base URL | `https://api.pinata.cloud` |
//! | `COURIER_REGISTRATION_BACKOFF_SECS` | Wait before resending a rejected registration | `5` |
//! | `COURIER_CONGESTION_COOLDOWN_SECS` | Wait after a congested ledger write | `8` |
//! | `COURIER_ACK_TIMEOUT_SECS` | Bound on a report acknowledgement | `120` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,report_courier=debug` |

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::pinning::pinata::DEFAULT_PINATA_API_URL;
use crate::storage::paths::DATA_ROOT;

pub const SENDER_SEED_ENV: &str = "COURIER_SENDER_SEED";
pub const OWNER_EMAIL_ENV: &str = "COURIER_OWNER_EMAIL";
pub const DATA_DIR_ENV: &str = "COURIER_DATA_DIR";
pub const RELAY_URL_ENV: &str = "COURIER_RELAY_URL";
pub const INTEGRATOR_PEER_ID_ENV: &str = "COURIER_INTEGRATOR_PEER_ID";
pub const LEDGER_ENDPOINTS_ENV: &str = "COURIER_LEDGER_ENDPOINTS";
pub const PINATA_API_URL_ENV: &str = "COURIER_PINATA_API_URL";
pub const REGISTRATION_BACKOFF_ENV: &str = "COURIER_REGISTRATION_BACKOFF_SECS";
pub const CONGESTION_COOLDOWN_ENV: &str = "COURIER_CONGESTION_COOLDOWN_SECS";
pub const ACK_TIMEOUT_ENV: &str = "COURIER_ACK_TIMEOUT_SECS";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_LOG_FILTER: &str = "info,report_courier=debug";

/// Local libp2p proxy.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8888";

/// Peer id of the integrator behind the relay.
pub const DEFAULT_INTEGRATOR_PEER_ID: &str = "12D3KooWBE2XrMkf1Z6P3AtKqYmvdD59aoD5xwKySrCgkmBqJNFh";

pub const DEFAULT_LEDGER_ENDPOINTS: [&str; 3] = [
    "wss://kusama.rpc.robonomics.network/",
    "wss://robonomics.leemo.me/",
    "wss://robonomics.0xsamsara.com/",
];

pub const DEFAULT_REGISTRATION_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(120);

// Relay topics.
pub const INITIALIZATION_TOPIC: &str = "/initialization";
pub const CREDENTIALS_RESPONSE_TOPIC: &str = "/pinataCreds";
pub const INTEGRATOR_LOOKUP_TOPIC: &str = "/integratorAddress";
pub const REPORT_TOPIC: &str = "/report";
pub const REPORT_RESPONSE_TOPIC: &str = "/reportResponse";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(String),

    #[error("Invalid URL in {name}: {reason}")]
    InvalidUrl { name: String, reason: String },

    #[error("Invalid number in {name}: {value}")]
    InvalidNumber { name: String, value: String },
}

#[derive(Clone, PartialEq, Eq)]
pub struct CourierConfig {
    pub sender_seed: Option<String>,
    pub owner_email: Option<String>,
    pub data_dir: PathBuf,
    pub relay_url: String,
    pub integrator_peer_id: String,
    pub ledger_endpoints: Vec<String>,
    pub pinata_api_url: String,
    pub registration_backoff: Duration,
    pub congestion_cooldown: Duration,
    pub ack_timeout: Duration,
}

impl std::fmt::Debug for CourierConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierConfig")
            .field("sender_seed", &self.sender_seed.as_ref().map(|_| "<redacted>"))
            .field("owner_email", &self.owner_email)
            .field("data_dir", &self.data_dir)
            .field("relay_url", &self.relay_url)
            .field("integrator_peer_id", &self.integrator_peer_id)
            .field("ledger_endpoints", &self.ledger_endpoints)
            .field("pinata_api_url", &self.pinata_api_url)
            .field("registration_backoff", &self.registration_backoff)
            .field("congestion_cooldown", &self.congestion_cooldown)
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

impl CourierConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_optional)
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default =
            |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let relay_url = or_default(RELAY_URL_ENV, DEFAULT_RELAY_URL);
        validate_url(RELAY_URL_ENV, &relay_url, &["ws", "wss"])?;

        let pinata_api_url = or_default(PINATA_API_URL_ENV, DEFAULT_PINATA_API_URL);
        validate_url(PINATA_API_URL_ENV, &pinata_api_url, &["http", "https"])?;

        let ledger_endpoints: Vec<String> = match lookup(LEDGER_ENDPOINTS_ENV) {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_LEDGER_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
        };
        if ledger_endpoints.is_empty() {
            return Err(ConfigError::Missing(LEDGER_ENDPOINTS_ENV.to_string()));
        }
        for endpoint in &ledger_endpoints {
            validate_url(LEDGER_ENDPOINTS_ENV, endpoint, &["ws", "wss"])?;
        }

        let secs = |name: &str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(name) {
                None => Ok(default),
                Some(value) => value
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::InvalidNumber {
                        name: name.to_string(),
                        value,
                    }),
            }
        };

        Ok(Self {
            sender_seed: lookup(SENDER_SEED_ENV),
            owner_email: lookup(OWNER_EMAIL_ENV),
            data_dir: PathBuf::from(or_default(DATA_DIR_ENV, DATA_ROOT)),
            relay_url,
            integrator_peer_id: or_default(INTEGRATOR_PEER_ID_ENV, DEFAULT_INTEGRATOR_PEER_ID),
            ledger_endpoints,
            pinata_api_url,
            registration_backoff: secs(REGISTRATION_BACKOFF_ENV, DEFAULT_REGISTRATION_BACKOFF)?,
            congestion_cooldown: secs(
                CONGESTION_COOLDOWN_ENV,
                crate::ledger::queue::DEFAULT_CONGESTION_COOLDOWN,
            )?,
            ack_timeout: secs(ACK_TIMEOUT_ENV, DEFAULT_ACK_TIMEOUT)?,
        })
    }

    pub fn require_sender_seed(&self) -> Result<&str, ConfigError> {
        self.sender_seed
            .as_deref()
            .ok_or_else(|| ConfigError::Missing(SENDER_SEED_ENV.to_string()))
    }

    pub fn require_owner_email(&self) -> Result<&str, ConfigError> {
        self.owner_email
            .as_deref()
            .ok_or_else(|| ConfigError::Missing(OWNER_EMAIL_ENV.to_string()))
    }
}

fn validate_url(name: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        name: name.to_string(),
        reason: format!("{value}: {e}"),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrl {
            name: name.to_string(),
            reason: format!("{value}: expected scheme {}", schemes.join(" or ")),
        });
    }
    Ok(())
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = CourierConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.integrator_peer_id, DEFAULT_INTEGRATOR_PEER_ID);
        assert_eq!(config.ledger_endpoints.len(), 3);
        assert_eq!(config.registration_backoff, Duration::from_secs(5));
        assert_eq!(config.congestion_cooldown, Duration::from_secs(8));
        assert_eq!(config.ack_timeout, Duration::from_secs(120));
        assert!(config.require_sender_seed().is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = CourierConfig::from_lookup(lookup(&[
            (LEDGER_ENDPOINTS_ENV, "wss://one.example, wss://two.example"),
            (REGISTRATION_BACKOFF_ENV, "1"),
            (SENDER_SEED_ENV, "0xabc"),
        ]))
        .unwrap();
        assert_eq!(
            config.ledger_endpoints,
            vec!["wss://one.example", "wss://two.example"]
        );
        assert_eq!(config.registration_backoff, Duration::from_secs(1));
        assert_eq!(config.require_sender_seed().unwrap(), "0xabc");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            CourierConfig::from_lookup(lookup(&[(RELAY_URL_ENV, "not a url")])),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            CourierConfig::from_lookup(lookup(&[(RELAY_URL_ENV, "https://relay")])),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            CourierConfig::from_lookup(lookup(&[(ACK_TIMEOUT_ENV, "soon")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            CourierConfig::from_lookup(lookup(&[(LEDGER_ENDPOINTS_ENV, " , ")])),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn debug_hides_seed() {
        let config =
            CourierConfig::from_lookup(lookup(&[(SENDER_SEED_ENV, "secret words")])).unwrap();
        assert!(!format!("{config:?}").contains("secret words"));
    }
}
