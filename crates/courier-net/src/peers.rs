//! Connected gossip peers and the chat topics each one has joined.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use libp2p::{Multiaddr, PeerId};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub peer_id: PeerId,
    pub address: Multiaddr,
    pub connected_at: DateTime<Utc>,
    /// Gossipsub topics the peer announced.
    pub topics: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PeerTracker {
    peers: HashMap<PeerId, ConnectionInfo>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection.  A second connection to a known peer keeps its
    /// topics and original timestamp.
    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr) {
        debug!(peer = %peer_id, addr = %address, "Tracking peer connection");
        self.peers
            .entry(peer_id)
            .and_modify(|info| info.address = address.clone())
            .or_insert_with(|| ConnectionInfo {
                peer_id,
                address,
                connected_at: Utc::now(),
                topics: HashSet::new(),
            });
    }

    /// Forget a peer once its last connection closed.
    pub fn on_disconnected(&mut self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).is_some() {
            debug!(peer = %peer_id, "Removed peer from tracker");
        }
    }

    pub fn on_subscribed(&mut self, peer_id: &PeerId, topic: &str) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.topics.insert(topic.to_string());
        }
    }

    pub fn on_unsubscribed(&mut self, peer_id: &PeerId, topic: &str) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.topics.remove(topic);
        }
    }

    /// Connected peers that joined `topic`.
    pub fn subscribers_of(&self, topic: &str) -> usize {
        self.peers
            .values()
            .filter(|info| info.topics.contains(topic))
            .count()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&ConnectionInfo> {
        self.peers.get(peer_id)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> Multiaddr {
        format!("/ip4/127.0.0.1/udp/{port}/quic-v1").parse().unwrap()
    }

    #[test]
    fn test_reconnect_keeps_topics() {
        let mut tracker = PeerTracker::new();
        let peer = PeerId::random();

        tracker.on_connected(peer, addr(4001));
        tracker.on_subscribed(&peer, "chat/direct_1_2/messages");
        let first_seen = tracker.get(&peer).unwrap().connected_at;

        tracker.on_connected(peer, addr(4002));
        let info = tracker.get(&peer).unwrap();
        assert_eq!(info.address, addr(4002));
        assert_eq!(info.connected_at, first_seen);
        assert_eq!(tracker.subscribers_of("chat/direct_1_2/messages"), 1);
        assert_eq!(tracker.peer_count(), 1);
    }

    #[test]
    fn test_topic_counts_follow_membership() {
        let mut tracker = PeerTracker::new();
        let (p1, p2) = (PeerId::random(), PeerId::random());
        let topic = "chat/group_abc/read-receipts";

        tracker.on_connected(p1, addr(4001));
        tracker.on_connected(p2, addr(4002));
        tracker.on_subscribed(&p1, topic);
        tracker.on_subscribed(&p2, topic);
        // Unknown peers are ignored.
        tracker.on_subscribed(&PeerId::random(), topic);
        assert_eq!(tracker.subscribers_of(topic), 2);

        tracker.on_unsubscribed(&p1, topic);
        tracker.on_disconnected(&p2);
        assert_eq!(tracker.subscribers_of(topic), 0);
        assert_eq!(tracker.connected_peers(), vec![p1]);
    }
}
