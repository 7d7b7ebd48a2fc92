// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Report bundles.
//!
//! | File | Content | Encryption |
//! |------|---------|------------|
//! | `home-assistant.log` | last 3 MiB of the host log | envelope |
//! | `trace.saved_traces` | last 3 MiB of saved traces | envelope |
//! | `picture{n}` | decoded picture bytes | sealed for the integrator |
//! | `issue_description.json` | description document | envelope |
//!
//! Envelopes are readable by the integrator and by the device itself.

use std::io::ErrorKind;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use super::ReportRequest;
use crate::codec::{self, CryptoError};
use crate::error::ReportError;
use crate::keys::{Address, KeyRing};
use crate::pinning::{ContentIds, FileBlob};
use crate::storage::StoragePaths;

pub const LOG_FILE_NAME: &str = "home-assistant.log";
pub const TRACES_FILE_NAME: &str = "trace.saved_traces";
pub const DESCRIPTION_FILE_NAME: &str = "issue_description.json";

/// Only the last `LOGS_MAX_LEN` characters of each log file are sent.
pub const LOGS_MAX_LEN: usize = 3 * 1024 * 1024;

/// Encrypted files ready for pinning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportBundle {
    files: Vec<FileBlob>,
}

impl ReportBundle {
    pub fn files(&self) -> &[FileBlob] {
        &self.files
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Last `max` characters of `text`.
pub fn tail(text: &str, max: usize) -> &str {
    if max == 0 {
        return "";
    }
    match text.char_indices().nth_back(max - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

/// Decode a `data:<mime>;base64,<payload>` URL (or bare base64).
pub fn decode_picture(data: &str) -> Result<Vec<u8>, ReportError> {
    let payload = data.split_once(',').map_or(data, |(_, payload)| payload);
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ReportError::InvalidAttachment(e.to_string()))
}

async fn read_log(path: &Path) -> Result<Option<String>, ReportError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            Ok(Some(tail(&text, LOGS_MAX_LEN).to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Collect and encrypt every file of a full report.
pub async fn build(
    paths: &StoragePaths,
    sender: &KeyRing,
    integrator: &Address,
    request: &ReportRequest,
) -> Result<ReportBundle, ReportError> {
    let mut logs = Vec::new();
    if let Some(text) = read_log(&paths.log_file()).await? {
        logs.push((LOG_FILE_NAME, text));
    }
    if let Some(text) = read_log(&paths.traces_file()).await? {
        logs.push((TRACES_FILE_NAME, text));
    }
    let pictures = request
        .pictures
        .iter()
        .map(|p| decode_picture(p))
        .collect::<Result<Vec<_>, _>>()?;
    let description = serde_json::to_vec(&request.description_document())
        .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;

    let sender = sender.clone();
    let integrator = integrator.clone();
    let files = codec::run_blocking(move || {
        let recipients = [integrator.to_string()];
        let mut files = Vec::with_capacity(logs.len() + pictures.len() + 1);

        for (name, text) in logs {
            let envelope = codec::encrypt_for(text.as_bytes(), &sender, &recipients)?;
            files.push(FileBlob::new(name, envelope.to_json()?));
        }
        for (index, picture) in pictures.iter().enumerate() {
            let sealed = codec::seal(picture, &sender, &integrator)?;
            files.push(FileBlob::new(format!("picture{}", index + 1), sealed));
        }
        let envelope = codec::encrypt_for(&description, &sender, &recipients)?;
        files.push(FileBlob::new(DESCRIPTION_FILE_NAME, envelope.to_json()?));
        Ok(files)
    })
    .await?;

    let bundle = ReportBundle { files };
    debug!(files = ?bundle.names().collect::<Vec<_>>(), "Report bundle built");
    Ok(bundle)
}

/// Description sealed for the integrator, sent without pinning.
pub async fn inline_description(
    sender: &KeyRing,
    integrator: &Address,
    request: &ReportRequest,
) -> Result<ContentIds, ReportError> {
    let document = serde_json::to_vec(&serde_json::json!({ "description": request.description }))
        .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
    let sender = sender.clone();
    let integrator = integrator.clone();
    let sealed = codec::run_blocking(move || codec::seal(&document, &sender, &integrator)).await?;

    let mut files = ContentIds::new();
    files.insert(DESCRIPTION_FILE_NAME.to_string(), sealed);
    Ok(files)
}
