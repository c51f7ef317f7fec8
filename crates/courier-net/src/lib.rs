//! Pub/sub transport for Courier.
//!
//! The [`Broker`] trait is the seam the chat core publishes through.  Two
//! implementations ship here: an in-process [`MemoryHub`] with MQTT-style
//! wildcard routing, and a [`GossipBroker`] built on a libp2p gossipsub swarm
//! over QUIC for multi-node deployments.

pub mod behaviour;
pub mod broker;
pub mod discovery;
pub mod gossip;
pub mod memory;
pub mod peers;
pub mod swarm;
pub mod transport;

pub use behaviour::{CourierBehaviour, CourierEvent};
pub use broker::{
    client_id_with_suffix, connect, Broker, BrokerError, ConnectOptions, Inbound, InboundMessage,
};
pub use discovery::{load_bootstrap_peers, parse_multiaddrs};
pub use gossip::GossipBroker;
pub use memory::{MemoryHub, MemorySession};
pub use peers::{ConnectionInfo, PeerTracker};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
pub use transport::build_swarm;
