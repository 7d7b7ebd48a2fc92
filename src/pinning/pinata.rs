// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pinata pinning client.
//!
//! Credentials are read from the `credentials` record on every call so that
//! a re-registration takes effect without rebuilding the client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{FileBlob, PinError, PinStore};
use crate::storage::{CredentialsRepository, JsonStore, PinCredentials};

pub const DEFAULT_PINATA_API_URL: &str = "https://api.pinata.cloud";

/// Marker Pinata puts in the 403 body once a key has been revoked.
const REVOKED_MARKER: &str = "API_KEY_REVOKED";

const PIN_FILE_PATH: &str = "/pinning/pinFileToIPFS";
const UNPIN_PATH: &str = "/pinning/unpin";

#[derive(Debug, Deserialize)]
struct PinFileResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

pub struct PinataPinStore {
    api_base_url: String,
    store: Arc<JsonStore>,
    http: Client,
}

impl PinataPinStore {
    pub fn new(api_base_url: impl Into<String>, store: Arc<JsonStore>) -> Result<Self, PinError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PinError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url: api_base_url.into(),
            store,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }

    fn credentials(&self) -> Result<PinCredentials, PinError> {
        CredentialsRepository::new(&self.store)
            .get()
            .map_err(|e| PinError::Request(format!("failed to read credentials: {e}")))?
            .ok_or(PinError::MissingCredentials)
    }
}

/// Map a non-success Pinata response onto a [`PinError`].
fn classify_failure(file: &str, status: StatusCode, body: &str) -> PinError {
    if status == StatusCode::FORBIDDEN && body.contains(REVOKED_MARKER) {
        return PinError::CredentialsRevoked;
    }
    PinError::Rejected {
        file: file.to_string(),
        reason: format!("{status}: {body}"),
    }
}

#[async_trait]
impl PinStore for PinataPinStore {
    async fn pin_file(&self, file: &FileBlob) -> Result<String, PinError> {
        let credentials = self.credentials()?;
        let form = Form::new().part(
            "file",
            Part::bytes(file.bytes.clone()).file_name(file.name.clone()),
        );

        let response = self
            .http
            .post(self.endpoint(PIN_FILE_PATH))
            .header("pinata_api_key", &credentials.public)
            .header("pinata_secret_api_key", &credentials.secret)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PinError::Request(format!("POST {PIN_FILE_PATH} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(&file.name, status, &body));
        }

        let parsed: PinFileResponse = response.json().await.map_err(|e| PinError::Rejected {
            file: file.name.clone(),
            reason: format!("invalid response: {e}"),
        })?;
        debug!(file = %file.name, content_id = %parsed.ipfs_hash, "Pinata accepted file");
        Ok(parsed.ipfs_hash)
    }

    async fn unpin(&self, content_id: &str) -> Result<(), PinError> {
        let credentials = self.credentials()?;
        let path = format!("{UNPIN_PATH}/{content_id}");
        let response = self
            .http
            .delete(self.endpoint(&path))
            .header("pinata_api_key", &credentials.public)
            .header("pinata_secret_api_key", &credentials.secret)
            .send()
            .await
            .map_err(|e| PinError::Request(format!("DELETE {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(content_id, status, &body));
        }
        Ok(())
    }
}
