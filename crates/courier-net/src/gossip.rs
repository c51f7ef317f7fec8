//! [`Broker`] over a libp2p gossipsub swarm.
//!
//! Gossipsub topics are exact strings, so chat topics are not joined one by
//! one.  Each topic kind has a single mesh topic (`chat/messages`,
//! `chat/read-receipts`); a frame published there carries the concrete chat
//! topic ahead of the payload, and subscription patterns are matched against
//! it on receipt.  A pattern subscribes every mesh topic it could cover, so
//! `chat/+/messages` hears chats created on other nodes.
//!
//! A publish resolves once gossipsub has handed the frame to at least one
//! peer; with no peers on the mesh topic it fails.  Frames published by this
//! node are not echoed back to it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use libp2p::identity::Keypair;
use libp2p::Multiaddr;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use courier_shared::constants::MAX_PAYLOAD_SIZE;
use courier_shared::topics::{
    parse_topic, topic_matches, TopicKind, MESSAGES_SUFFIX, RECEIPTS_SUFFIX, TOPIC_ROOT,
};

use crate::broker::{
    Broker, BrokerError, ConnectOptions, Inbound, InboundMessage, INBOUND_CHANNEL_CAPACITY,
};
use crate::swarm::{spawn_swarm, Ack, SwarmCommand, SwarmConfig, SwarmNotification};

/// Mesh topic carrying every chat's messages.
pub const MESH_MESSAGES: &str = "chat/messages";

/// Mesh topic carrying every chat's read receipts.
pub const MESH_RECEIPTS: &str = "chat/read-receipts";

pub struct GossipBroker {
    client_id: String,
    cmd_tx: mpsc::Sender<SwarmCommand>,
    patterns: Arc<RwLock<Vec<String>>>,
    joined: Mutex<HashSet<&'static str>>,
}

impl GossipBroker {
    /// Spawn a swarm listening on `listen_addr` and the task that forwards
    /// matching gossip frames to the returned receiver.
    pub async fn start(
        client_id: String,
        listen_addr: Multiaddr,
        options: ConnectOptions,
    ) -> Result<(Self, Inbound), BrokerError> {
        let keypair = Keypair::generate_ed25519();
        let config = SwarmConfig {
            listen_addr,
            bootstrap_peers_path: options.bootstrap_peers_path,
        };

        let (cmd_tx, notif_rx, local_peer_id) = spawn_swarm(keypair, config)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let patterns = Arc::new(RwLock::new(Vec::new()));
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        tokio::spawn(forward_inbound(notif_rx, Arc::clone(&patterns), inbound_tx));

        info!(client_id = %client_id, peer_id = %local_peer_id, "Gossip broker started");

        Ok((
            Self {
                client_id,
                cmd_tx,
                patterns,
                joined: Mutex::new(HashSet::new()),
            },
            inbound_rx,
        ))
    }

    async fn request(&self, build: impl FnOnce(Ack) -> SwarmCommand) -> Result<(), BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| BrokerError::Closed)?;
        reply_rx.await.map_err(|_| BrokerError::Closed)?
    }

    async fn join_mesh(&self, mesh_topic: &'static str) -> Result<(), BrokerError> {
        if self.joined.lock().contains(mesh_topic) {
            return Ok(());
        }
        let topic = mesh_topic.to_string();
        self.request(|reply| SwarmCommand::Subscribe { topic, reply })
            .await?;
        self.joined.lock().insert(mesh_topic);
        debug!(mesh_topic, "Joined mesh topic");
        Ok(())
    }
}

#[async_trait]
impl Broker for GossipBroker {
    async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError> {
        let mesh_topics = mesh_topics_for_pattern(pattern);
        if mesh_topics.is_empty() {
            return Err(BrokerError::SubscribeFailed {
                pattern: pattern.to_string(),
                reason: "pattern covers no chat topic".into(),
            });
        }
        for mesh_topic in mesh_topics {
            self.join_mesh(mesh_topic).await?;
        }

        let mut patterns = self.patterns.write();
        if !patterns.iter().any(|p| p == pattern) {
            patterns.push(pattern.to_string());
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
        let mesh_topic = mesh_topic_for(topic).ok_or_else(|| BrokerError::PublishRejected {
            topic: topic.to_string(),
            reason: "not a chat topic".into(),
        })?;

        let data = encode_frame(topic, &payload)?;
        self.request(|reply| SwarmCommand::Publish {
            topic: mesh_topic.to_string(),
            data,
            reply,
        })
        .await?;
        debug!(topic, mesh_topic, len = payload.len(), "Published to gossip mesh");
        Ok(())
    }

    async fn peer_count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(SwarmCommand::GetPeers(reply_tx)).await.is_err() {
            return 0;
        }
        reply_rx.await.map(|peers| peers.len()).unwrap_or(0)
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Drop for GossipBroker {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(SwarmCommand::Shutdown);
    }
}

fn mesh_topic_for_kind(kind: TopicKind) -> &'static str {
    match kind {
        TopicKind::Messages => MESH_MESSAGES,
        TopicKind::ReadReceipts => MESH_RECEIPTS,
    }
}

/// Mesh topic a concrete chat topic travels on.
fn mesh_topic_for(topic: &str) -> Option<&'static str> {
    parse_topic(topic).map(|(_, kind)| mesh_topic_for_kind(kind))
}

/// Mesh topics whose chat topics `pattern` can match.  A concrete channel
/// level in the pattern is kept; a wildcard one is replaced by a sample id.
fn mesh_topics_for_pattern(pattern: &str) -> Vec<&'static str> {
    let channel = match pattern.split('/').nth(1) {
        Some(level) if level != "+" && level != "#" && !level.is_empty() => level,
        _ => "any",
    };
    [
        (MESSAGES_SUFFIX, TopicKind::Messages),
        (RECEIPTS_SUFFIX, TopicKind::ReadReceipts),
    ]
    .into_iter()
    .filter(|(suffix, _)| topic_matches(pattern, &format!("{TOPIC_ROOT}/{channel}/{suffix}")))
    .map(|(_, kind)| mesh_topic_for_kind(kind))
    .collect()
}

/// `[topic length: u16 BE][topic][payload]`
fn encode_frame(topic: &str, payload: &[u8]) -> Result<Vec<u8>, BrokerError> {
    let len = u16::try_from(topic.len()).map_err(|_| BrokerError::PublishRejected {
        topic: topic.to_string(),
        reason: "topic too long".into(),
    })?;
    let mut frame = Vec::with_capacity(2 + topic.len() + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(topic.as_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn decode_frame(frame: &[u8]) -> Option<(String, Bytes)> {
    if frame.len() < 2 {
        return None;
    }
    let (len, rest) = frame.split_at(2);
    let len = u16::from_be_bytes([len[0], len[1]]) as usize;
    if rest.len() < len {
        return None;
    }
    let (topic, payload) = rest.split_at(len);
    let topic = std::str::from_utf8(topic).ok()?.to_string();
    Some((topic, Bytes::copy_from_slice(payload)))
}

fn matches_any(patterns: &[String], topic: &str) -> bool {
    patterns.iter().any(|p| topic_matches(p, topic))
}

async fn forward_inbound(
    mut notif_rx: mpsc::Receiver<SwarmNotification>,
    patterns: Arc<RwLock<Vec<String>>>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) {
    while let Some(notification) = notif_rx.recv().await {
        match notification {
            SwarmNotification::MessageReceived { topic: mesh_topic, data, source } => {
                let Some((topic, payload)) = decode_frame(&data) else {
                    warn!(mesh_topic = %mesh_topic, len = data.len(), "Dropping malformed gossip frame");
                    continue;
                };
                // A frame must travel on the mesh topic of its own kind.
                if mesh_topic_for(&topic) != Some(mesh_topic.as_str()) {
                    warn!(mesh_topic = %mesh_topic, topic = %topic, "Dropping misrouted gossip frame");
                    continue;
                }
                if !matches_any(&patterns.read(), &topic) {
                    debug!(topic = %topic, "Dropping gossip frame outside subscriptions");
                    continue;
                }
                debug!(topic = %topic, source = ?source, "Forwarding gossip frame");
                if inbound_tx.send(InboundMessage { topic, payload }).await.is_err() {
                    break;
                }
            }
            other => debug!(notification = ?other, "Swarm notification"),
        }
    }
    info!("Gossip inbound forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use courier_shared::topics::ALL_MESSAGES;
    use tokio::time::{sleep, timeout, Instant};

    fn loopback(port: u16) -> Multiaddr {
        format!("/ip4/127.0.0.1/udp/{port}/quic-v1").parse().unwrap()
    }

    fn free_udp_port() -> u16 {
        std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec!["chat/+/messages".to_string(), "chat/group_a/read-receipts".to_string()];
        assert!(matches_any(&patterns, "chat/direct_1_2/messages"));
        assert!(matches_any(&patterns, "chat/group_a/read-receipts"));
        assert!(!matches_any(&patterns, "chat/group_b/read-receipts"));
        assert!(!matches_any(&[], "chat/direct_1_2/messages"));
    }

    #[test]
    fn test_patterns_map_to_mesh_topics() {
        assert_eq!(mesh_topics_for_pattern("chat/+/messages"), vec![MESH_MESSAGES]);
        assert_eq!(mesh_topics_for_pattern("chat/+/read-receipts"), vec![MESH_RECEIPTS]);
        assert_eq!(mesh_topics_for_pattern("chat/direct_1_2/messages"), vec![MESH_MESSAGES]);
        assert_eq!(mesh_topics_for_pattern("chat/#"), vec![MESH_MESSAGES, MESH_RECEIPTS]);
        assert_eq!(mesh_topics_for_pattern("#"), vec![MESH_MESSAGES, MESH_RECEIPTS]);
        assert!(mesh_topics_for_pattern("news/today").is_empty());
        assert!(mesh_topics_for_pattern("chat/+/typing").is_empty());

        assert_eq!(mesh_topic_for("chat/group_x/read-receipts"), Some(MESH_RECEIPTS));
        assert_eq!(mesh_topic_for("news/today"), None);
    }

    #[test]
    fn test_frame_carries_topic() {
        let frame = encode_frame("chat/direct_a_b/messages", b"{\"id\":1}").unwrap();
        let (topic, payload) = decode_frame(&frame).unwrap();
        assert_eq!(topic, "chat/direct_a_b/messages");
        assert_eq!(&payload[..], b"{\"id\":1}");

        assert!(decode_frame(&[0]).is_none());
        assert!(decode_frame(&[0, 9, b'c']).is_none());
        assert!(decode_frame(&[0, 1, 0xff]).is_none());
    }

    #[tokio::test]
    async fn test_lonely_node_rejects_publish() {
        let (broker, _inbound) =
            GossipBroker::start("node_0000".into(), loopback(0), ConnectOptions::default())
                .await
                .unwrap();

        broker.subscribe(ALL_MESSAGES).await.unwrap();
        broker.subscribe("chat/direct_1_2/messages").await.unwrap();
        assert_eq!(broker.patterns.read().len(), 2);
        assert_eq!(broker.joined.lock().len(), 1);

        assert!(matches!(
            broker.subscribe("news/today").await,
            Err(BrokerError::SubscribeFailed { .. })
        ));
        assert!(matches!(
            broker.publish("news/today", Bytes::from_static(b"{}")).await,
            Err(BrokerError::PublishRejected { .. })
        ));

        let result = broker
            .publish("chat/direct_1_2/messages", Bytes::from_static(b"{}"))
            .await;
        assert!(matches!(result, Err(BrokerError::PublishRejected { .. })));
        assert_eq!(broker.peer_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wildcard_subscriber_hears_chat_created_on_peer() {
        let a_addr = loopback(free_udp_port());
        let (node_a, mut a_inbound) =
            GossipBroker::start("node_a".into(), a_addr.clone(), ConnectOptions::default())
                .await
                .unwrap();
        node_a.subscribe(ALL_MESSAGES).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let peers_file = dir.path().join("peers.txt");
        std::fs::write(&peers_file, format!("{a_addr}\n")).unwrap();
        let (node_b, _b_inbound) = GossipBroker::start(
            "node_b".into(),
            loopback(0),
            ConnectOptions {
                bootstrap_peers_path: Some(peers_file),
            },
        )
        .await
        .unwrap();

        // Node B only ever heard of this chat locally.
        let topic = "chat/group_new/messages";
        node_b.subscribe(topic).await.unwrap();

        let payload = Bytes::from_static(b"{\"content\":\"hello\"}");
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            match node_b.publish(topic, payload.clone()).await {
                Ok(()) => break,
                Err(e) if Instant::now() < deadline => {
                    debug!(error = %e, "Mesh not ready yet");
                    sleep(Duration::from_millis(250)).await;
                }
                Err(e) => panic!("publish never accepted: {e}"),
            }
        }

        let received = timeout(Duration::from_secs(10), a_inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.topic, topic);
        assert_eq!(received.payload, payload);
    }
}
