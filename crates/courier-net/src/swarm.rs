//! Swarm orchestration with the tokio mpsc command/notification pattern.
//!
//! The event loop runs in a dedicated tokio task.  Callers talk to it through
//! [`SwarmCommand`]s; publish and subscribe carry a oneshot so the caller
//! learns whether gossipsub accepted the request.

use std::path::PathBuf;

use futures::StreamExt;
use libp2p::{gossipsub, identify, kad, swarm::SwarmEvent, Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::behaviour::CourierEvent;
use crate::broker::BrokerError;
use crate::discovery::{extract_peer_id, load_bootstrap_peers};
use crate::peers::PeerTracker;
use crate::transport::build_swarm;

/// Reply channel for commands gossipsub can refuse.
pub type Ack = oneshot::Sender<Result<(), BrokerError>>;

/// Commands sent *into* the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    Publish {
        topic: String,
        data: Vec<u8>,
        reply: Ack,
    },
    Subscribe {
        topic: String,
        reply: Ack,
    },
    GetPeers(oneshot::Sender<Vec<PeerId>>),
    Shutdown,
}

/// Notifications sent *from* the swarm task.
#[derive(Debug, Clone)]
pub enum SwarmNotification {
    PeerConnected {
        peer_id: PeerId,
        address: Multiaddr,
    },
    PeerDisconnected {
        peer_id: PeerId,
    },
    MessageReceived {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
}

pub struct SwarmConfig {
    pub listen_addr: Multiaddr,
    /// File of bootstrap multiaddrs, one per line.
    pub bootstrap_peers_path: Option<PathBuf>,
}

/// Spawn the libp2p swarm in a background tokio task.
///
/// Returns `(command_tx, notification_rx, local_peer_id)`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    swarm.listen_on(config.listen_addr.clone())?;
    info!(peer_id = %local_peer_id, addr = %config.listen_addr, "Swarm listening");

    if let Some(ref path) = config.bootstrap_peers_path {
        let bootstrap_addrs = load_bootstrap_peers(path);
        for addr in &bootstrap_addrs {
            if let Err(e) = swarm.dial(addr.clone()) {
                warn!(addr = %addr, error = %e, "Failed to dial bootstrap peer");
                continue;
            }
            if let Some(peer_id) = extract_peer_id(addr) {
                swarm
                    .behaviour_mut()
                    .kademlia
                    .add_address(&peer_id, addr.clone());
            }
            debug!(addr = %addr, "Dialing bootstrap peer");
        }

        if !bootstrap_addrs.is_empty() {
            if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
                warn!(error = %e, "Kademlia bootstrap failed to start");
            }
        }
    }

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<SwarmCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<SwarmNotification>(256);

    tokio::spawn(async move {
        let mut peer_tracker = PeerTracker::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SwarmCommand::Publish { topic, data, reply }) => {
                            debug!(
                                topic = %topic,
                                subscribers = peer_tracker.subscribers_of(&topic),
                                "Publishing to mesh"
                            );
                            let result = match swarm
                                .behaviour_mut()
                                .gossipsub
                                .publish(gossipsub::IdentTopic::new(&topic), data)
                            {
                                // A duplicate id means the mesh already holds this payload.
                                Ok(_) | Err(gossipsub::PublishError::Duplicate) => Ok(()),
                                Err(e) => {
                                    warn!(topic = %topic, error = %e, "Publish failed");
                                    Err(BrokerError::PublishRejected {
                                        topic,
                                        reason: e.to_string(),
                                    })
                                }
                            };
                            let _ = reply.send(result);
                        }
                        Some(SwarmCommand::Subscribe { topic, reply }) => {
                            let result = swarm
                                .behaviour_mut()
                                .gossipsub
                                .subscribe(&gossipsub::IdentTopic::new(&topic))
                                .map(|_| ())
                                .map_err(|e| {
                                    error!(topic = %topic, error = %e, "Subscribe failed");
                                    BrokerError::SubscribeFailed {
                                        pattern: topic.clone(),
                                        reason: e.to_string(),
                                    }
                                });
                            let _ = reply.send(result);
                        }
                        Some(SwarmCommand::GetPeers(reply)) => {
                            let _ = reply.send(peer_tracker.connected_peers());
                        }
                        Some(SwarmCommand::Shutdown) => {
                            info!("Swarm shutdown requested");
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down swarm");
                            break;
                        }
                    }
                }

                event = swarm.select_next_some() => {
                    match event {
                        SwarmEvent::Behaviour(CourierEvent::Gossipsub(
                            gossipsub::Event::Message { message, .. },
                        )) => {
                            let topic = message.topic.to_string();
                            debug!(
                                topic = %topic,
                                source = ?message.source,
                                len = message.data.len(),
                                "GossipSub message received"
                            );
                            let _ = notif_tx
                                .send(SwarmNotification::MessageReceived {
                                    source: message.source,
                                    topic,
                                    data: message.data,
                                })
                                .await;
                        }

                        SwarmEvent::Behaviour(CourierEvent::Gossipsub(
                            gossipsub::Event::Subscribed { peer_id, topic },
                        )) => {
                            debug!(peer = %peer_id, topic = %topic, "Peer joined topic");
                            peer_tracker.on_subscribed(&peer_id, topic.as_str());
                        }

                        SwarmEvent::Behaviour(CourierEvent::Gossipsub(
                            gossipsub::Event::Unsubscribed { peer_id, topic },
                        )) => {
                            debug!(peer = %peer_id, topic = %topic, "Peer left topic");
                            peer_tracker.on_unsubscribed(&peer_id, topic.as_str());
                        }

                        SwarmEvent::Behaviour(CourierEvent::Kademlia(
                            kad::Event::OutboundQueryProgressed { result, .. },
                        )) => {
                            debug!(result = ?result, "Kademlia query progressed");
                        }

                        SwarmEvent::Behaviour(CourierEvent::Identify(
                            identify::Event::Received { peer_id, info, .. },
                        )) => {
                            debug!(
                                peer = %peer_id,
                                protocol = ?info.protocol_version,
                                "Identify: received info from peer"
                            );
                            for addr in &info.listen_addrs {
                                swarm
                                    .behaviour_mut()
                                    .kademlia
                                    .add_address(&peer_id, addr.clone());
                            }
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            let addr = endpoint.get_remote_address().clone();
                            peer_tracker.on_connected(peer_id, addr.clone());
                            info!(peer = %peer_id, addr = %addr, "Peer connected");
                            let _ = notif_tx
                                .send(SwarmNotification::PeerConnected {
                                    peer_id,
                                    address: addr,
                                })
                                .await;
                        }

                        SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                            if num_established == 0 {
                                peer_tracker.on_disconnected(&peer_id);
                                info!(peer = %peer_id, "Peer disconnected");
                                let _ = notif_tx
                                    .send(SwarmNotification::PeerDisconnected { peer_id })
                                    .await;
                            }
                        }

                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "Listening on new address");
                        }

                        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
                        }

                        SwarmEvent::IncomingConnectionError { error, .. } => {
                            warn!(error = %error, "Incoming connection error");
                        }

                        _ => {}
                    }
                }
            }
        }

        info!("Swarm event loop terminated");
    });

    Ok((cmd_tx, notif_rx, local_peer_id))
}
