// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process relay.
//!
//! Publishes are recorded on a broadcast channel so that the other end of
//! the conversation (a test, or an embedded integrator) can observe them and
//! answer through [`InMemoryRelay::deliver`].

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use super::{TopicReceiver, TopicRegistry, TransportError, TransportLink};

const PUBLISHED_CAPACITY: usize = 256;

/// A message handed to the relay by [`TransportLink::publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub target_peer: String,
    pub payload: Value,
}

pub struct InMemoryRelay {
    topics: TopicRegistry,
    published: broadcast::Sender<PublishedMessage>,
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self {
            topics: TopicRegistry::new(),
            published: broadcast::channel(PUBLISHED_CAPACITY).0,
        }
    }

    /// Observe everything published from now on.
    pub fn published(&self) -> broadcast::Receiver<PublishedMessage> {
        self.published.subscribe()
    }

    /// Deliver `message` to the subscribers of `topic`. Returns how many received it.
    pub async fn deliver(&self, topic: &str, message: Value) -> usize {
        let delivered = self.topics.dispatch(topic, message).await;
        debug!(topic = %topic, delivered, "In-memory relay delivery");
        delivered
    }

    /// Number of live subscriptions on `topic`.
    pub async fn listeners(&self, topic: &str) -> usize {
        self.topics.listeners(topic).await
    }

    pub async fn active_topics(&self) -> Vec<String> {
        self.topics.active_topics().await
    }
}

#[async_trait]
impl TransportLink for InMemoryRelay {
    async fn subscribe(&self, topic: &str) -> Result<TopicReceiver, TransportError> {
        let (receiver, _) = self.topics.attach(topic).await;
        Ok(receiver)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &Value,
        target_peer: &str,
    ) -> Result<(), TransportError> {
        // Nobody observing is the same as a peer that never answers.
        let _ = self.published.send(PublishedMessage {
            topic: topic.to_string(),
            target_peer: target_peer.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.topics.detach(topic).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_is_observable_and_delivery_reaches_subscribers() {
        let relay = InMemoryRelay::new();
        let mut observed = relay.published();
        let mut inbox = relay.subscribe("/pinataCreds/addr").await.unwrap();

        relay
            .publish("/initialization", &json!({"email": "x"}), "peer-1")
            .await
            .unwrap();
        let message = observed.recv().await.unwrap();
        assert_eq!(message.topic, "/initialization");
        assert_eq!(message.target_peer, "peer-1");
        assert_eq!(message.payload, json!({"email": "x"}));

        assert_eq!(relay.deliver("/pinataCreds/addr", json!({"public": "p"})).await, 1);
        assert_eq!(inbox.recv().await, Some(json!({"public": "p"})));
    }

    #[tokio::test]
    async fn unsubscribed_topics_drop_messages() {
        let relay = InMemoryRelay::new();
        let _inbox = relay.subscribe("/report").await.unwrap();
        relay.unsubscribe("/report").await.unwrap();
        assert_eq!(relay.listeners("/report").await, 0);
        assert_eq!(relay.deliver("/report", json!({})).await, 0);
    }
}
