// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Submission Queue
//!
//! Strict FIFO of ledger writes with a single writer task.
//!
//! Each entry moves `Queued → Sending → {Committed | Failed}`. At most one
//! entry is `Sending` at any time, so ledger write order equals enqueue
//! order. A failed entry has its content unpinned exactly once, then the
//! worker moves on to the next entry.
//!
//! ```rust,ignore
//! let (queue, worker) = SubmissionQueue::new(ledger, pins, ring, delegate, settings);
//! tokio::spawn(worker.run(shutdown.clone()));
//! let outcome = queue.enqueue(payload, content_ids).await;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EndpointRing, Ledger, LedgerError, Receipt};
use crate::keys::Address;
use crate::pinning::{unpin_best_effort, ContentIds, PinStore};

/// Pause between failover attempts.
pub const DEFAULT_FAILOVER_PAUSE: Duration = Duration::from_secs(2);

/// Wait after a congestion rejection before retrying the same endpoint.
pub const DEFAULT_CONGESTION_COOLDOWN: Duration = Duration::from_secs(8);

/// Congestion retries allowed for one write.
pub const DEFAULT_MAX_CONGESTION_RETRIES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionSettings {
    pub failover_pause: Duration,
    pub congestion_cooldown: Duration,
    pub max_congestion_retries: u32,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            failover_pause: DEFAULT_FAILOVER_PAUSE,
            congestion_cooldown: DEFAULT_CONGESTION_COOLDOWN,
            max_congestion_retries: DEFAULT_MAX_CONGESTION_RETRIES,
        }
    }
}

/// Terminal state of one queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Committed(Receipt),
    Failed(LedgerError),
}

impl WriteOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, WriteOutcome::Committed(_))
    }
}

/// Resolves once the entry reached a terminal state. Dropping it does not
/// cancel the write.
pub struct PendingWrite {
    rx: oneshot::Receiver<WriteOutcome>,
}

impl Future for PendingWrite {
    type Output = WriteOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(WriteOutcome::Failed(LedgerError::Fatal(
                "submission queue stopped".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct QueuedWrite {
    payload: String,
    compensation: ContentIds,
    outcome: oneshot::Sender<WriteOutcome>,
}

#[derive(Default)]
struct QueueState {
    queued: AtomicUsize,
    sending: AtomicBool,
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct SubmissionQueue {
    tx: mpsc::UnboundedSender<QueuedWrite>,
    state: Arc<QueueState>,
}

/// Consumer side; owns the ledger and performs the writes.
pub struct SubmissionWorker {
    rx: mpsc::UnboundedReceiver<QueuedWrite>,
    state: Arc<QueueState>,
    ledger: Arc<dyn Ledger>,
    pins: Arc<dyn PinStore>,
    ring: EndpointRing,
    delegate: Address,
    settings: SubmissionSettings,
}

impl SubmissionQueue {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        pins: Arc<dyn PinStore>,
        ring: EndpointRing,
        delegate: Address,
        settings: SubmissionSettings,
    ) -> (Self, SubmissionWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());
        let worker = SubmissionWorker {
            rx,
            state: state.clone(),
            ledger,
            pins,
            ring,
            delegate,
            settings,
        };
        (Self { tx, state }, worker)
    }

    /// Append a write. `compensation` is unpinned if the write fails.
    pub fn enqueue(&self, payload: String, compensation: ContentIds) -> PendingWrite {
        let (outcome, rx) = oneshot::channel();
        self.state.queued.fetch_add(1, Ordering::SeqCst);
        let entry = QueuedWrite {
            payload,
            compensation,
            outcome,
        };
        if self.tx.send(entry).is_err() {
            // The returned future resolves to a failure via the dropped sender.
            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            warn!("Submission queue is stopped; write dropped");
        }
        PendingWrite { rx }
    }

    /// Entries waiting behind the one being sent.
    pub fn queued(&self) -> usize {
        self.state.queued.load(Ordering::SeqCst)
    }

    pub fn is_sending(&self) -> bool {
        self.state.sending.load(Ordering::SeqCst)
    }
}

impl SubmissionWorker {
    pub fn ring(&self) -> &EndpointRing {
        &self.ring
    }

    /// Drain the queue until the cancellation token is triggered.
    ///
    /// An in-flight write always reaches a terminal state before the loop
    /// observes shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            endpoints = self.ring.len(),
            delegate = %self.delegate,
            "Submission queue starting"
        );

        loop {
            let entry = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(entry) => entry,
                    None => break,
                },
            };

            self.state.queued.fetch_sub(1, Ordering::SeqCst);
            self.state.sending.store(true, Ordering::SeqCst);
            let outcome = self.process(&entry).await;
            self.state.sending.store(false, Ordering::SeqCst);

            // The caller may have dropped its PendingWrite.
            let _ = entry.outcome.send(outcome);
        }

        info!(
            abandoned = self.state.queued.load(Ordering::SeqCst),
            "Submission queue shutting down"
        );
    }

    async fn process(&self, entry: &QueuedWrite) -> WriteOutcome {
        match self.write(&entry.payload).await {
            Ok(receipt) => {
                info!(
                    endpoint = %receipt.endpoint,
                    tx_hash = %receipt.tx_hash,
                    "Ledger write committed"
                );
                WriteOutcome::Committed(receipt)
            }
            Err(e) => {
                error!(error = %e, "Ledger write failed; unpinning report content");
                let released = unpin_best_effort(self.pins.as_ref(), &entry.compensation).await;
                debug!(released, "Compensation finished");
                WriteOutcome::Failed(e)
            }
        }
    }

    /// One write with failover and congestion handling.
    async fn write(&self, payload: &str) -> Result<Receipt, LedgerError> {
        let mut timeouts = 0usize;
        let mut congested = 0u32;

        loop {
            let endpoint = self.ring.current().to_string();
            debug!(endpoint = %endpoint, "Submitting ledger write");

            match self.ledger.submit(&endpoint, &self.delegate, payload).await {
                Ok(receipt) => return Ok(receipt),
                Err(LedgerError::Timeout) => {
                    timeouts += 1;
                    let next = self.ring.advance();
                    warn!(
                        endpoint = %endpoint,
                        next = %next,
                        attempt = timeouts,
                        "Ledger endpoint timed out"
                    );
                    if timeouts >= self.ring.len() {
                        return Err(LedgerError::Fatal(format!(
                            "all {timeouts} ledger endpoints timed out"
                        )));
                    }
                    tokio::time::sleep(self.settings.failover_pause).await;
                }
                Err(LedgerError::Congested { code }) => {
                    congested += 1;
                    if congested > self.settings.max_congestion_retries {
                        return Err(LedgerError::Fatal(format!(
                            "ledger still congested after {} retries (code {code})",
                            self.settings.max_congestion_retries
                        )));
                    }
                    warn!(
                        endpoint = %endpoint,
                        code,
                        cooldown_secs = self.settings.congestion_cooldown.as_secs_f64(),
                        "Ledger congested; cooling down"
                    );
                    tokio::time::sleep(self.settings.congestion_cooldown).await;
                }
                Err(fatal @ LedgerError::Fatal(_)) => return Err(fatal),
            }
        }
    }
}
