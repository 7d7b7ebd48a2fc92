// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Correlator
//!
//! Request/response semantics on top of a fire-and-forget [`TransportLink`].
//!
//! ## Single-shot exchanges
//!
//! ```text
//! subscribe {base}/{own address}  ─┐
//! subscribe /feedback              │  one cycle at a time per correlator
//! publish request ─────────────────┤
//! wait: response | non-ok feedback | cancel | (optional) timeout
//! unsubscribe both                ─┘  on every exit path
//! ```
//!
//! Response topics always carry the caller's address, so correlators for
//! different identities never see each other's responses.
//!
//! ## Keyed exchanges
//!
//! [`KeyedCorrelator`] lets many requests share one response topic. Each
//! waiter is keyed by the request `id`; the subscription is created by the
//! first waiter and torn down when the last one leaves.
//!
//! ## Feedback
//!
//! The relay reports delivery problems on `/feedback` as
//! `{"feedback": "ok" | <reason>}`. A feedback message applies to a waiter
//! unless it names another `address` (or, for keyed waits, another `id`).
//! `"ok"` never completes a wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::keys::Address;
use crate::transport::{TopicReceiver, TransportError, TransportLink};

/// Shared topic on which the relay reports delivery status.
pub const FEEDBACK_TOPIC: &str = "/feedback";

/// Response topic for `base` scoped to one identity.
pub fn scoped_topic(base: &str, address: &Address) -> String {
    format!("{base}/{address}")
}

/// How a feedback message relates to a waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Ok,
    Rejected(String),
    Unrelated,
}

/// Classify a feedback message for the waiter identified by `address` and `key`.
pub fn classify_feedback(message: &Value, address: &Address, key: Option<&str>) -> Feedback {
    let Some(status) = message.get("feedback") else {
        return Feedback::Unrelated;
    };

    if let Some(other) = message.get("address").and_then(Value::as_str) {
        if other != address.as_str() {
            return Feedback::Unrelated;
        }
    }
    if let (Some(key), Some(id)) = (key, message.get("id")) {
        if value_key(id).as_deref() != Some(key) {
            return Feedback::Unrelated;
        }
    }

    match status.as_str() {
        Some("ok") => Feedback::Ok,
        Some(reason) => Feedback::Rejected(reason.to_string()),
        None => Feedback::Rejected(status.to_string()),
    }
}

fn value_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Correlation table
// =============================================================================

/// Waiter state for one response topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingWaiter {
    pub expected: usize,
    pub received: usize,
    pub latest: Option<Value>,
    pub rejected: Option<String>,
}

/// Response topic → pending waiter.
#[derive(Default)]
pub struct CorrelationTable {
    waiters: Mutex<HashMap<String, PendingWaiter>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, topic: &str, expected: usize) {
        self.waiters.lock().await.insert(
            topic.to_string(),
            PendingWaiter {
                expected,
                ..PendingWaiter::default()
            },
        );
    }

    /// Record a response; returns `true` once all expected responses arrived.
    pub async fn record_response(&self, topic: &str, message: Value) -> bool {
        let mut waiters = self.waiters.lock().await;
        match waiters.get_mut(topic) {
            Some(waiter) => {
                waiter.received += 1;
                waiter.latest = Some(message);
                waiter.received >= waiter.expected
            }
            None => false,
        }
    }

    pub async fn record_rejection(&self, topic: &str, reason: &str) {
        if let Some(waiter) = self.waiters.lock().await.get_mut(topic) {
            waiter.rejected = Some(reason.to_string());
        }
    }

    pub async fn remove(&self, topic: &str) -> Option<PendingWaiter> {
        self.waiters.lock().await.remove(topic)
    }

    pub async fn get(&self, topic: &str) -> Option<PendingWaiter> {
        self.waiters.lock().await.get(topic).cloned()
    }

    pub async fn pending_topics(&self) -> Vec<String> {
        self.waiters.lock().await.keys().cloned().collect()
    }
}

// =============================================================================
// Single-shot correlator
// =============================================================================

/// One outstanding request/response cycle at a time for one identity.
pub struct RequestCorrelator {
    link: Arc<dyn TransportLink>,
    address: Address,
    target_peer: String,
    response_timeout: Option<Duration>,
    cycle: Mutex<()>,
    table: CorrelationTable,
}

impl RequestCorrelator {
    pub fn new(link: Arc<dyn TransportLink>, address: Address, target_peer: impl Into<String>) -> Self {
        Self {
            link,
            address,
            target_peer: target_peer.into(),
            response_timeout: None,
            cycle: Mutex::new(()),
            table: CorrelationTable::new(),
        }
    }

    /// Bound each wait by a wall-clock timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn table(&self) -> &CorrelationTable {
        &self.table
    }

    /// Publish `payload` on `request_topic` and wait for the answer on
    /// `{response_base}/{own address}`.
    pub async fn send_and_await(
        &self,
        request_topic: &str,
        response_base: &str,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, TransportError> {
        let _cycle = self.cycle.lock().await;
        let response_topic = scoped_topic(response_base, &self.address);

        let mut responses = self.link.subscribe(&response_topic).await?;
        let mut feedback = match self.link.subscribe(FEEDBACK_TOPIC).await {
            Ok(feedback) => feedback,
            Err(e) => {
                self.release(&response_topic).await;
                return Err(e);
            }
        };
        self.table.register(&response_topic, 1).await;

        let outcome = self
            .exchange(
                request_topic,
                &response_topic,
                payload,
                &mut responses,
                &mut feedback,
                cancel,
            )
            .await;

        self.table.remove(&response_topic).await;
        self.release(&response_topic).await;
        self.release(FEEDBACK_TOPIC).await;
        outcome
    }

    /// [`send_and_await`](Self::send_and_await), resending after `backoff`
    /// whenever the relay rejects the request.
    pub async fn send_with_retry(
        &self,
        request_topic: &str,
        response_base: &str,
        payload: &Value,
        backoff: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, TransportError> {
        let mut rejections = 0u32;
        loop {
            match self
                .send_and_await(request_topic, response_base, payload, cancel)
                .await
            {
                Err(TransportError::Rejected(reason)) => {
                    rejections += 1;
                    warn!(
                        topic = %request_topic,
                        reason = %reason,
                        rejections,
                        backoff_ms = backoff.as_millis() as u64,
                        "Relay rejected request, resending after backoff"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {},
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                    }
                }
                other => return other,
            }
        }
    }

    async fn exchange(
        &self,
        request_topic: &str,
        response_topic: &str,
        payload: &Value,
        responses: &mut TopicReceiver,
        feedback: &mut TopicReceiver,
        cancel: &CancellationToken,
    ) -> Result<Value, TransportError> {
        self.link
            .publish(request_topic, payload, &self.target_peer)
            .await?;
        debug!(topic = %request_topic, response_topic = %response_topic, "Request published");

        let deadline = self.response_timeout.map(|timeout| Instant::now() + timeout);
        loop {
            tokio::select! {
                message = responses.recv() => {
                    let Some(message) = message else {
                        return Err(TransportError::Closed);
                    };
                    if !message.is_object() {
                        warn!(topic = %response_topic, "Ignoring malformed response");
                        continue;
                    }
                    self.table.record_response(response_topic, message.clone()).await;
                    return Ok(message);
                }
                message = feedback.recv() => {
                    let Some(message) = message else {
                        return Err(TransportError::Closed);
                    };
                    match classify_feedback(&message, &self.address, None) {
                        Feedback::Rejected(reason) => {
                            self.table.record_rejection(response_topic, &reason).await;
                            return Err(TransportError::Rejected(reason));
                        }
                        Feedback::Ok => debug!(topic = %request_topic, "Relay accepted request"),
                        Feedback::Unrelated => {}
                    }
                }
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = sleep_until(deadline) => {
                    let waited = self.response_timeout.unwrap_or_default();
                    return Err(TransportError::Timeout(waited.as_millis() as u64));
                }
            }
        }
    }

    async fn release(&self, topic: &str) {
        if let Err(e) = self.link.unsubscribe(topic).await {
            warn!(topic = %topic, error = %e, "Failed to unsubscribe");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Keyed correlator
// =============================================================================

type Waiter = oneshot::Sender<Result<Value, TransportError>>;

#[derive(Default)]
struct KeyedState {
    /// Outstanding keys. `None` once the waiter was answered.
    waiters: HashMap<String, Option<Waiter>>,
    pump: Option<CancellationToken>,
}

/// Many concurrent requests sharing one reference-counted response topic.
pub struct KeyedCorrelator {
    link: Arc<dyn TransportLink>,
    address: Address,
    target_peer: String,
    response_topic: String,
    response_timeout: Duration,
    state: Arc<Mutex<KeyedState>>,
}

impl KeyedCorrelator {
    pub fn new(
        link: Arc<dyn TransportLink>,
        address: Address,
        target_peer: impl Into<String>,
        response_base: &str,
        response_timeout: Duration,
    ) -> Self {
        let response_topic = scoped_topic(response_base, &address);
        Self {
            link,
            address,
            target_peer: target_peer.into(),
            response_topic,
            response_timeout,
            state: Arc::new(Mutex::new(KeyedState::default())),
        }
    }

    pub fn response_topic(&self) -> &str {
        &self.response_topic
    }

    /// Number of requests currently waiting on the shared topic.
    pub async fn outstanding(&self) -> usize {
        self.state.lock().await.waiters.len()
    }

    /// Publish `payload` and wait for the response whose `id` equals `key`.
    pub async fn send_and_await(
        &self,
        request_topic: &str,
        payload: &Value,
        key: &str,
    ) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.register(key, tx).await?;
        // Releases the key even if this future is dropped mid-wait.
        let guard = WaiterGuard {
            link: self.link.clone(),
            state: self.state.clone(),
            response_topic: self.response_topic.clone(),
            key: Some(key.to_string()),
        };

        if let Err(e) = self
            .link
            .publish(request_topic, payload, &self.target_peer)
            .await
        {
            guard.release().await;
            return Err(e);
        }
        debug!(topic = %request_topic, key = %key, "Keyed request published");

        let outcome = tokio::select! {
            answer = rx => answer.unwrap_or(Err(TransportError::Closed)),
            _ = tokio::time::sleep(self.response_timeout) => {
                Err(TransportError::Timeout(self.response_timeout.as_millis() as u64))
            }
        };

        guard.release().await;
        outcome
    }

    async fn register(&self, key: &str, waiter: Waiter) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.waiters.contains_key(key) {
            return Err(TransportError::DuplicateRequest(key.to_string()));
        }

        if state.pump.is_none() {
            let responses = self.link.subscribe(&self.response_topic).await?;
            let feedback = match self.link.subscribe(FEEDBACK_TOPIC).await {
                Ok(feedback) => feedback,
                Err(e) => {
                    let _ = self.link.unsubscribe(&self.response_topic).await;
                    return Err(e);
                }
            };
            let token = CancellationToken::new();
            tokio::spawn(pump(
                responses,
                feedback,
                self.state.clone(),
                self.address.clone(),
                token.clone(),
            ));
            state.pump = Some(token);
            debug!(topic = %self.response_topic, "Shared response subscription created");
        }

        state.waiters.insert(key.to_string(), Some(waiter));
        Ok(())
    }
}

/// Removes one key from the keyed state; the last key out tears the shared
/// subscription down.
struct WaiterGuard {
    link: Arc<dyn TransportLink>,
    state: Arc<Mutex<KeyedState>>,
    response_topic: String,
    key: Option<String>,
}

impl WaiterGuard {
    async fn release(mut self) {
        if let Some(key) = self.key.take() {
            release_waiter(self.link.as_ref(), &self.state, &self.response_topic, &key).await;
        }
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else { return };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %key, "No runtime to release abandoned request");
            return;
        };
        let link = self.link.clone();
        let state = self.state.clone();
        let response_topic = self.response_topic.clone();
        runtime.spawn(async move {
            debug!(key = %key, "Releasing abandoned keyed request");
            release_waiter(link.as_ref(), &state, &response_topic, &key).await;
        });
    }
}

async fn release_waiter(
    link: &dyn TransportLink,
    state: &Mutex<KeyedState>,
    response_topic: &str,
    key: &str,
) {
    let mut state = state.lock().await;
    state.waiters.remove(key);
    if !state.waiters.is_empty() {
        return;
    }

    if let Some(token) = state.pump.take() {
        token.cancel();
        for topic in [response_topic, FEEDBACK_TOPIC] {
            if let Err(e) = link.unsubscribe(topic).await {
                warn!(topic = %topic, error = %e, "Failed to unsubscribe");
            }
        }
        debug!(topic = %response_topic, "Shared response subscription torn down");
    }
}

async fn pump(
    mut responses: TopicReceiver,
    mut feedback: TopicReceiver,
    state: Arc<Mutex<KeyedState>>,
    address: Address,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            message = responses.recv() => {
                let Some(message) = message else { return };
                let Some(key) = message.get("id").and_then(value_key) else {
                    warn!(topic = %responses.topic(), "Ignoring response without id");
                    continue;
                };
                let mut state = state.lock().await;
                match state.waiters.get_mut(&key).and_then(Option::take) {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(message));
                    }
                    None => debug!(key = %key, "Response for unknown or finished request"),
                }
            }
            message = feedback.recv() => {
                let Some(message) = message else { return };
                let mut state = state.lock().await;
                for (key, slot) in state.waiters.iter_mut() {
                    if let Feedback::Rejected(reason) = classify_feedback(&message, &address, Some(key)) {
                        if let Some(waiter) = slot.take() {
                            let _ = waiter.send(Err(TransportError::Rejected(reason)));
                        }
                    }
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}
