//! The broker seam.
//!
//! A [`Broker`] is one process-wide pub/sub session.  Inbound traffic is not
//! part of the trait: [`connect`] hands back an mpsc receiver alongside the
//! session and every message matching a subscription lands there.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use libp2p::Multiaddr;
use rand::RngCore;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::gossip::GossipBroker;
use crate::memory::MemoryHub;

/// Scheme selecting the in-process hub.
pub const MEMORY_SCHEME: &str = "memory://";

/// Capacity of the inbound message channel returned by [`connect`].
pub const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// A message delivered to this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Publish to {topic} rejected: {reason}")]
    PublishRejected { topic: String, reason: String },

    #[error("Subscribe to {pattern} failed: {reason}")]
    SubscribeFailed { pattern: String, reason: String },

    #[error("Payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Invalid broker url: {0}")]
    InvalidUrl(String),

    #[error("Broker session closed")]
    Closed,
}

/// A connected pub/sub session.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Subscribe to a topic pattern.  `+` matches one level, a trailing `#`
    /// matches the rest.  Subscribing twice to the same pattern is a no-op.
    async fn subscribe(&self, pattern: &str) -> Result<(), BrokerError>;

    /// Publish with at-least-once semantics.  Resolves only once the broker
    /// has accepted the message.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Number of remote parties currently reachable through this session.
    async fn peer_count(&self) -> usize;

    fn client_id(&self) -> &str;
}

/// Options for [`connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// File of multiaddrs dialed on startup (gossip transport only).
    pub bootstrap_peers_path: Option<PathBuf>,
}

/// Receiver half handed back by [`connect`].
pub type Inbound = mpsc::Receiver<InboundMessage>;

/// Open a broker session for `url`.
///
/// `memory://…` selects a fresh in-process hub; anything else must parse as
/// a libp2p multiaddr and starts a gossipsub node listening there.  The
/// session's client id is `client_id_prefix` plus 8 random hex characters.
pub async fn connect(
    url: &str,
    client_id_prefix: &str,
    options: ConnectOptions,
) -> Result<(Arc<dyn Broker>, Inbound), BrokerError> {
    let client_id = client_id_with_suffix(client_id_prefix);

    if url.starts_with(MEMORY_SCHEME) {
        let hub = MemoryHub::new();
        let (session, inbound) = hub.connect(&client_id);
        info!(url, client_id = %client_id, "Connected to in-process broker");
        return Ok((Arc::new(session), inbound));
    }

    let listen_addr: Multiaddr = url
        .parse()
        .map_err(|e| BrokerError::InvalidUrl(format!("{url}: {e}")))?;

    let (broker, inbound) = GossipBroker::start(client_id, listen_addr, options).await?;
    Ok((Arc::new(broker), inbound))
}

/// `prefix` followed by `_` and 8 random lowercase hex characters.
pub fn client_id_with_suffix(prefix: &str) -> String {
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("{prefix}_{}", hex::encode(suffix))
}
