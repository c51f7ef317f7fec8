//! In-process broker with MQTT-style topic routing.
//!
//! A [`MemoryHub`] fans every publish out to each connected session whose
//! subscriptions match the topic.  A session receives a given publish at
//! most once even when several of its patterns match.  The hub can be taken
//! offline with [`MemoryHub::set_available`] to exercise delivery failures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use courier_shared::constants::MAX_PAYLOAD_SIZE;
use courier_shared::topics::topic_matches;

use crate::broker::{Broker, BrokerError, Inbound, InboundMessage, INBOUND_CHANNEL_CAPACITY};

struct Subscriber {
    session: u64,
    patterns: Vec<String>,
    tx: mpsc::Sender<InboundMessage>,
}

struct HubState {
    sessions: HashMap<String, Subscriber>,
    next_session: u64,
    available: bool,
}

/// Shared routing table.  Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                sessions: HashMap::new(),
                next_session: 0,
                available: true,
            })),
        }
    }

    /// Register a session.  Reusing a client id replaces the old session,
    /// as an MQTT broker would.
    pub fn connect(&self, client_id: &str) -> (MemorySession, Inbound) {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let session = {
            let mut state = self.state.lock();
            state.next_session += 1;
            let session = state.next_session;
            state.sessions.insert(
                client_id.to_string(),
                Subscriber {
                    session,
                    patterns: Vec::new(),
                    tx,
                },
            );
            session
        };

        let session = MemorySession {
            hub: self.clone(),
            client_id: client_id.to_string(),
            session,
        };
        (session, rx)
    }

    /// Take the hub offline (`false`) or bring it back.  While offline every
    /// subscribe and publish fails with [`BrokerError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.state.lock().available {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("memory hub offline".into()))
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's view of a [`MemoryHub`].
pub struct MemorySession {
    hub: MemoryHub,
    client_id: String,
    // Distinguishes this session from a later one reusing the client id.
    session: u64,
}

#[async_trait]
impl Broker for MemorySession {
    async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        self.hub.ensure_available()?;

        let mut state = self.hub.state.lock();
        let subscriber = state
            .sessions
            .get_mut(&self.client_id)
            .filter(|sub| sub.session == self.session)
            .ok_or(BrokerError::Closed)?;

        if !subscriber.patterns.iter().any(|p| p == pattern) {
            subscriber.patterns.push(pattern.to_string());
            debug!(client_id = %self.client_id, pattern, "Subscribed");
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(BrokerError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_SIZE,
            });
        }
        self.hub.ensure_available()?;

        // Snapshot the matching senders so the lock is not held across sends.
        let targets: Vec<(String, mpsc::Sender<InboundMessage>)> = {
            let state = self.hub.state.lock();
            state
                .sessions
                .iter()
                .filter(|(_, sub)| sub.patterns.iter().any(|p| topic_matches(p, topic)))
                .map(|(id, sub)| (id.clone(), sub.tx.clone()))
                .collect()
        };

        for (client_id, tx) in targets {
            let message = InboundMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if tx.send(message).await.is_err() {
                debug!(client_id = %client_id, topic, "Subscriber receiver dropped");
            }
        }

        debug!(topic, len = payload.len(), "Published to memory hub");
        Ok(())
    }

    async fn peer_count(&self) -> usize {
        self.hub.session_count().saturating_sub(1)
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut state = self.hub.state.lock();
        if state
            .sessions
            .get(&self.client_id)
            .is_some_and(|sub| sub.session == self.session)
        {
            state.sessions.remove(&self.client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wildcard_fan_out() {
        let hub = MemoryHub::new();
        let (alice, mut alice_rx) = hub.connect("alice");
        let (bob, mut bob_rx) = hub.connect("bob");

        alice.subscribe("chat/+/messages").await.unwrap();
        bob.subscribe("chat/direct_1_2/messages").await.unwrap();

        bob.publish("chat/direct_1_2/messages", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        bob.publish("chat/group_x/messages", Bytes::from_static(b"team"))
            .await
            .unwrap();

        assert_eq!(alice_rx.recv().await.unwrap().payload, Bytes::from_static(b"hi"));
        assert_eq!(alice_rx.recv().await.unwrap().topic, "chat/group_x/messages");

        assert_eq!(bob_rx.recv().await.unwrap().payload, Bytes::from_static(b"hi"));
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_overlapping_patterns_deliver_once() {
        let hub = MemoryHub::new();
        let (session, mut rx) = hub.connect("node");

        session.subscribe("chat/+/messages").await.unwrap();
        session.subscribe("chat/direct_1_2/messages").await.unwrap();
        session.subscribe("chat/#").await.unwrap();

        session
            .publish("chat/direct_1_2/messages", Bytes::from_static(b"x"))
            .await
            .unwrap();

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unavailable_hub_fails_calls() {
        let hub = MemoryHub::new();
        let (session, _rx) = hub.connect("node");

        hub.set_available(false);
        assert!(matches!(
            session.subscribe("chat/+/messages").await,
            Err(BrokerError::Unavailable(_))
        ));
        assert!(matches!(
            session.publish("chat/a/messages", Bytes::new()).await,
            Err(BrokerError::Unavailable(_))
        ));

        hub.set_available(true);
        session.publish("chat/a/messages", Bytes::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_payload_limit_and_session_cleanup() {
        let hub = MemoryHub::new();
        let (session, _rx) = hub.connect("node");
        let (other, _other_rx) = hub.connect("other");
        assert_eq!(session.peer_count().await, 1);

        let oversized = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            session.publish("chat/a/messages", oversized).await,
            Err(BrokerError::PayloadTooLarge { .. })
        ));

        drop(other);
        assert_eq!(hub.session_count(), 1);
    }

    #[tokio::test]
    async fn test_replaced_session_survives_old_drop() {
        let hub = MemoryHub::new();
        let (first, _first_rx) = hub.connect("node");
        let (second, mut second_rx) = hub.connect("node");
        assert_eq!(hub.session_count(), 1);

        assert!(matches!(
            first.subscribe("chat/+/messages").await,
            Err(BrokerError::Closed)
        ));

        drop(first);
        assert_eq!(hub.session_count(), 1);

        second.subscribe("chat/+/messages").await.unwrap();
        second
            .publish("chat/direct_1_2/messages", Bytes::from_static(b"still here"))
            .await
            .unwrap();
        assert_eq!(
            second_rx.recv().await.unwrap().payload,
            Bytes::from_static(b"still here")
        );

        drop(second);
        assert_eq!(hub.session_count(), 0);
    }
}
