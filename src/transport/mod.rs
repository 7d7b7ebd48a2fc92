// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Transport Link
//!
//! Fire-and-forget publish/subscribe by topic against a relay that forwards
//! JSON messages to libp2p peers.
//!
//! ## Model
//!
//! ```text
//!  subscribe(topic) ──► TopicReceiver ◄── messages delivered on topic
//!  publish(topic, payload, peer) ──► relay ──► peer
//!  unsubscribe(topic)  (once per subscribe; the last one stops listening)
//! ```
//!
//! Several flows may listen on the same topic at the same time (the shared
//! `/feedback` topic for instance), so subscriptions are reference counted
//! in a [`TopicRegistry`] and every subscriber receives every message.
//!
//! Implementations:
//! - [`memory::InMemoryRelay`] - in-process relay for tests and embedding
//! - [`ws::WsLink`] - reconnecting WebSocket link to the local libp2p proxy

pub mod memory;
pub mod ws;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

pub use memory::{InMemoryRelay, PublishedMessage};
pub use ws::WsLink;

/// Buffered messages per topic before slow subscribers start lagging.
const TOPIC_CAPACITY: usize = 64;

/// Errors raised by the transport and by correlated exchanges built on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Relay rejected the request: {0}")]
    Rejected(String),

    #[error("Relay connection failed: {0}")]
    Connection(String),

    #[error("Relay link closed")]
    Closed,

    #[error("Invalid relay message: {0}")]
    InvalidMessage(String),

    #[error("No response within {0} ms")]
    Timeout(u64),

    #[error("Exchange cancelled")]
    Cancelled,

    #[error("A request with id {0} is already waiting")]
    DuplicateRequest(String),
}

/// Duplex publish/subscribe channel to a relay.
#[async_trait]
pub trait TransportLink: Send + Sync {
    /// Start receiving messages published on `topic`.
    async fn subscribe(&self, topic: &str) -> Result<TopicReceiver, TransportError>;

    /// Send `payload` on `topic` to the peer identified by `target_peer`.
    async fn publish(
        &self,
        topic: &str,
        payload: &Value,
        target_peer: &str,
    ) -> Result<(), TransportError>;

    /// Release one subscription to `topic`.
    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;
}

/// Receiving end of a topic subscription.
pub struct TopicReceiver {
    topic: String,
    receiver: broadcast::Receiver<Value>,
}

impl TopicReceiver {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message on the topic, `None` once the topic was torn down.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(topic = %self.topic, lagged = count, "Topic subscriber lagged");
                }
            }
        }
    }
}

struct TopicEntry {
    sender: broadcast::Sender<Value>,
    listeners: usize,
}

/// Reference-counted topic fan-out shared by the link implementations.
#[derive(Default)]
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, TopicEntry>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. The flag is `true` for the first listener of the topic.
    pub async fn attach(&self, topic: &str) -> (TopicReceiver, bool) {
        let mut topics = self.topics.lock().await;
        let first = !topics.contains_key(topic);
        let entry = topics.entry(topic.to_string()).or_insert_with(|| TopicEntry {
            sender: broadcast::channel(TOPIC_CAPACITY).0,
            listeners: 0,
        });
        entry.listeners += 1;
        let receiver = TopicReceiver {
            topic: topic.to_string(),
            receiver: entry.sender.subscribe(),
        };
        (receiver, first)
    }

    /// Drop a listener. Returns `true` when the topic has no listeners left.
    pub async fn detach(&self, topic: &str) -> bool {
        let mut topics = self.topics.lock().await;
        let Some(entry) = topics.get_mut(topic) else {
            return false;
        };
        entry.listeners = entry.listeners.saturating_sub(1);
        if entry.listeners == 0 {
            topics.remove(topic);
            debug!(topic = %topic, "Topic torn down");
            true
        } else {
            false
        }
    }

    /// Fan a message out to the topic's listeners. Returns the receiver count.
    pub async fn dispatch(&self, topic: &str, message: Value) -> usize {
        let topics = self.topics.lock().await;
        match topics.get(topic) {
            Some(entry) => entry.sender.send(message).unwrap_or(0),
            None => 0,
        }
    }

    pub async fn listeners(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .await
            .get(topic)
            .map(|entry| entry.listeners)
            .unwrap_or(0)
    }

    pub async fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.lock().await.keys().cloned().collect();
        topics.sort();
        topics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registry_fans_out_to_every_listener() {
        let registry = TopicRegistry::new();
        let (mut a, first_a) = registry.attach("/feedback").await;
        let (mut b, first_b) = registry.attach("/feedback").await;
        assert!(first_a);
        assert!(!first_b);

        assert_eq!(registry.dispatch("/feedback", json!({"feedback": "ok"})).await, 2);
        assert_eq!(a.recv().await, Some(json!({"feedback": "ok"})));
        assert_eq!(b.recv().await, Some(json!({"feedback": "ok"})));
        assert_eq!(a.topic(), "/feedback");
    }

    #[tokio::test]
    async fn last_detach_tears_topic_down() {
        let registry = TopicRegistry::new();
        let (mut receiver, _) = registry.attach("/t").await;
        let _second = registry.attach("/t").await;
        assert_eq!(registry.listeners("/t").await, 2);

        assert!(!registry.detach("/t").await);
        assert!(registry.detach("/t").await);
        assert!(!registry.detach("/t").await);
        assert!(registry.active_topics().await.is_empty());

        assert_eq!(receiver.recv().await, None);
        assert_eq!(registry.dispatch("/t", json!(1)).await, 0);
    }
}
