// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WebSocket link to the local libp2p proxy.
//!
//! ## Proxy protocol
//!
//! ```text
//! listen:   one socket per topic, first frame {"protocols_to_listen": [topic]}
//!           then every inbound text frame is a message for that topic
//! publish:  short-lived socket, single frame
//!           {"protocol": topic, "serverPeerId": peer, "save_data": false, "data": payload}
//! ```
//!
//! `subscribe` returns once the listen frame has been sent, so a request
//! published right after it cannot overtake the subscription. A listener that
//! never connects fails every pending `subscribe`; once connected it
//! reconnects with exponential backoff until the topic is unsubscribed or the
//! link is closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{TopicReceiver, TopicRegistry, TransportError, TransportLink};

/// Base delay between reconnection attempts (exponential backoff).
const RECONNECT_BASE_DELAY_SECS: u64 = 2;

/// Maximum delay between reconnection attempts.
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

/// Connection state of one topic listener.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ListenerState {
    Connecting,
    Listening,
    Failed(String),
}

struct Listener {
    token: CancellationToken,
    state: watch::Receiver<ListenerState>,
}

pub struct WsLink {
    url: String,
    topics: Arc<TopicRegistry>,
    listeners: Mutex<HashMap<String, Listener>>,
    shutdown: CancellationToken,
}

impl WsLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_shutdown(url, CancellationToken::new())
    }

    /// Listener tasks stop when `shutdown` is cancelled.
    pub fn with_shutdown(url: impl Into<String>, shutdown: CancellationToken) -> Self {
        Self {
            url: url.into(),
            topics: Arc::new(TopicRegistry::new()),
            listeners: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop every listener socket.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl TransportLink for WsLink {
    async fn subscribe(&self, topic: &str) -> Result<TopicReceiver, TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let (receiver, mut state) = {
            let mut listeners = self.listeners.lock().await;
            let (receiver, first) = self.topics.attach(topic).await;
            let state = match listeners.get(topic) {
                Some(listener) if !first => listener.state.clone(),
                _ => {
                    let token = self.shutdown.child_token();
                    let (state_tx, state) = watch::channel(ListenerState::Connecting);
                    let stale = listeners.insert(
                        topic.to_string(),
                        Listener {
                            token: token.clone(),
                            state: state.clone(),
                        },
                    );
                    if let Some(stale) = stale {
                        stale.token.cancel();
                    }
                    tokio::spawn(listen_loop(
                        self.url.clone(),
                        topic.to_string(),
                        self.topics.clone(),
                        token,
                        state_tx,
                    ));
                    state
                }
            };
            (receiver, state)
        };

        let outcome = match state
            .wait_for(|s| *s != ListenerState::Connecting)
            .await
        {
            Ok(current) => match &*current {
                ListenerState::Failed(reason) => Err(TransportError::Connection(reason.clone())),
                _ => Ok(()),
            },
            Err(_) => Err(TransportError::Closed),
        };

        match outcome {
            Ok(()) => Ok(receiver),
            Err(e) => {
                drop(receiver);
                self.unsubscribe(topic).await?;
                Err(e)
            }
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &Value,
        target_peer: &str,
    ) -> Result<(), TransportError> {
        let frame = json!({
            "protocol": topic,
            "serverPeerId": target_peer,
            "save_data": false,
            "data": payload,
        });

        let (mut socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        socket
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        if let Err(e) = socket.close(None).await {
            debug!(topic = %topic, error = %e, "Publish socket close failed");
        }

        debug!(topic = %topic, peer = %target_peer, "Published message to relay");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut listeners = self.listeners.lock().await;
        if self.topics.detach(topic).await {
            if let Some(listener) = listeners.remove(topic) {
                listener.token.cancel();
            }
        }
        Ok(())
    }
}

async fn listen_loop(
    url: String,
    topic: String,
    topics: Arc<TopicRegistry>,
    cancel: CancellationToken,
    state: watch::Sender<ListenerState>,
) {
    let mut attempts = 0u32;

    loop {
        let result = tokio::select! {
            result = listen_once(&url, &topic, &topics, &mut attempts, &state) => result,
            _ = cancel.cancelled() => {
                debug!(topic = %topic, "Relay listener stopped");
                return;
            }
        };

        if let Err(e) = &result {
            if *state.borrow() == ListenerState::Connecting {
                warn!(topic = %topic, error = %e, "Relay listener could not connect");
                let reason = match e {
                    TransportError::Connection(reason) => reason.clone(),
                    other => other.to_string(),
                };
                state.send_replace(ListenerState::Failed(reason));
                return;
            }
        }

        match result {
            Ok(()) => info!(topic = %topic, "Relay closed listener socket, reconnecting"),
            Err(e) => warn!(topic = %topic, error = %e, "Relay listener failed, reconnecting"),
        }

        attempts = attempts.saturating_add(1);
        let delay = reconnect_delay(attempts);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = cancel.cancelled() => {
                debug!(topic = %topic, "Relay listener stopped");
                return;
            }
        }
    }
}

async fn listen_once(
    url: &str,
    topic: &str,
    topics: &TopicRegistry,
    attempts: &mut u32,
    state: &watch::Sender<ListenerState>,
) -> Result<(), TransportError> {
    let (mut socket, _) = connect_async(url)
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;

    let subscribe = json!({ "protocols_to_listen": [topic] });
    socket
        .send(Message::Text(subscribe.to_string().into()))
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;
    *attempts = 0;
    state.send_replace(ListenerState::Listening);
    debug!(topic = %topic, "Listening on relay topic");

    while let Some(frame) = socket.next().await {
        let frame = frame.map_err(|e| TransportError::Connection(e.to_string()))?;
        let text = match frame {
            Message::Text(text) => text.to_string(),
            Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Message::Close(_) => return Ok(()),
            _ => continue,
        };

        match parse_frame(&text) {
            Ok(message) => {
                topics.dispatch(topic, message).await;
            }
            Err(e) => warn!(topic = %topic, error = %e, "Dropping relay frame"),
        }
    }
    Ok(())
}

fn reconnect_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let secs = RECONNECT_BASE_DELAY_SECS.saturating_mul(1u64 << exponent);
    Duration::from_secs(secs.min(MAX_RECONNECT_DELAY_SECS))
}

/// Decode an inbound frame. Proxy envelopes (`protocol` + `data`) are
/// unwrapped, and string payloads holding JSON are decoded once more.
fn parse_frame(text: &str) -> Result<Value, TransportError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| TransportError::InvalidMessage(e.to_string()))?;

    let inner = match value {
        Value::Object(mut object) if object.contains_key("protocol") && object.contains_key("data") => {
            object.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    Ok(match inner {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_frames_pass_through() {
        let message = parse_frame(r#"{"feedback": "ok"}"#).unwrap();
        assert_eq!(message, json!({"feedback": "ok"}));
    }

    #[test]
    fn proxy_envelopes_are_unwrapped() {
        let message =
            parse_frame(r#"{"protocol": "/feedback", "data": {"feedback": "error"}}"#).unwrap();
        assert_eq!(message, json!({"feedback": "error"}));

        let nested = parse_frame(
            r#"{"protocol": "/pinataCreds/x", "data": "{\"public\": \"0xaa\"}"}"#,
        )
        .unwrap();
        assert_eq!(nested, json!({"public": "0xaa"}));
    }

    #[test]
    fn non_json_frames_are_rejected() {
        assert!(matches!(
            parse_frame("hello"),
            Err(TransportError::InvalidMessage(_))
        ));
    }

    #[test]
    fn reconnect_delay_backs_off_to_cap() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(2));
        assert_eq!(reconnect_delay(2), Duration::from_secs(4));
        assert_eq!(reconnect_delay(5), Duration::from_secs(32));
        assert_eq!(reconnect_delay(6), Duration::from_secs(60));
        assert_eq!(reconnect_delay(500), Duration::from_secs(60));
    }

    /// Minimal proxy: serves connections one at a time, remembers listener
    /// sockets by topic and forwards publish frames to them.
    async fn spawn_proxy() -> String {
        let server = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", server.local_addr().unwrap());
        tokio::spawn(async move {
            let mut listeners = HashMap::new();
            loop {
                let (stream, _) = server.accept().await.unwrap();
                let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
                let Some(Ok(Message::Text(text))) = socket.next().await else {
                    continue;
                };
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                if let Some(topics) = frame.get("protocols_to_listen") {
                    listeners.insert(topics[0].as_str().unwrap().to_string(), socket);
                } else if let Some(listener) = listeners.get_mut(frame["protocol"].as_str().unwrap()) {
                    listener
                        .send(Message::Text(frame.to_string().into()))
                        .await
                        .unwrap();
                }
            }
        });
        url
    }

    #[tokio::test]
    async fn publish_right_after_subscribe_is_received() {
        let link = WsLink::new(spawn_proxy().await);
        let mut responses = link.subscribe("/reportResponse/me").await.unwrap();

        link.publish("/reportResponse/me", &json!({"id": "1"}), "peer")
            .await
            .unwrap();
        let message = tokio::time::timeout(Duration::from_secs(5), responses.recv())
            .await
            .unwrap();
        assert_eq!(message, Some(json!({"id": "1"})));

        // A second subscriber joins the live listener.
        let _again = link.subscribe("/reportResponse/me").await.unwrap();
        assert_eq!(link.topics.listeners("/reportResponse/me").await, 2);
        link.close();
    }

    #[tokio::test]
    async fn unreachable_relay_fails_subscribe() {
        let link = WsLink::new("ws://127.0.0.1:1");
        assert!(matches!(
            link.subscribe("/feedback").await,
            Err(TransportError::Connection(_))
        ));
        assert!(link.topics.active_topics().await.is_empty());
        assert!(link.listeners.lock().await.is_empty());
    }

    #[tokio::test]
    async fn closed_link_refuses_subscriptions() {
        let link = WsLink::new("ws://127.0.0.1:1");
        link.close();
        assert!(matches!(
            link.subscribe("/feedback").await,
            Err(TransportError::Closed)
        ));
    }
}
