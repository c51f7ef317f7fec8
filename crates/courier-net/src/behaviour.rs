//! Composed libp2p `NetworkBehaviour` for gossip-mode brokers.
//!
//! GossipSub carries chat topics, Kademlia keeps the routing table filled
//! from bootstrap peers and Identify advertises the protocol version.

use libp2p::{
    gossipsub, identify,
    kad::{self, store::MemoryStore},
    swarm::NetworkBehaviour,
};

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "CourierEvent")]
pub struct CourierBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
}

/// Events emitted by the composed behaviour, one variant per sub-behaviour.
#[derive(Debug)]
pub enum CourierEvent {
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
    Identify(identify::Event),
}

impl From<gossipsub::Event> for CourierEvent {
    fn from(event: gossipsub::Event) -> Self {
        CourierEvent::Gossipsub(event)
    }
}

impl From<kad::Event> for CourierEvent {
    fn from(event: kad::Event) -> Self {
        CourierEvent::Kademlia(event)
    }
}

impl From<identify::Event> for CourierEvent {
    fn from(event: identify::Event) -> Self {
        CourierEvent::Identify(event)
    }
}
