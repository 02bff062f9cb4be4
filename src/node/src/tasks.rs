//! Periodic background work of a running node.

use crate::errors::NodeError;
use crate::metrics::LINK_STATE_RETRANSMISSIONS;
use crate::Node;
use futures::future::join_all;
use overlay_core::link_state::take_due_retransmissions;
use overlay_core::types::now_millis;
use overlay_network::types::PeerMessageContent;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

impl Node {
    /// Relays every stored update whose retransmission is due to all peers
    /// except its originator. Returns the number of updates relayed.
    pub async fn forward_link_state_updates(&self) -> Result<usize, NodeError> {
        let (pending, peers) = {
            let mut table = self.node_table();
            let pending = take_due_retransmissions(&mut table, &self.policy, now_millis())?;
            (pending, table.peers())
        };

        if pending.is_empty() {
            return Ok(0);
        }

        let mut sends = Vec::new();
        for retransmission in &pending {
            for peer in peers.iter().filter(|peer| **peer != retransmission.origin) {
                LINK_STATE_RETRANSMISSIONS.inc();
                sends.push(self.tell(
                    peer,
                    PeerMessageContent::LinkStateUpdate {
                        signed_node_info: retransmission.update.clone(),
                    },
                ));
            }
        }

        debug!(updates = pending.len(), messages = sends.len(), "relaying link state updates");
        join_all(sends).await;

        Ok(pending.len())
    }

    /// Re-issues our advertisement if needed, sends it to every peer and
    /// repeats outstanding peering requests.
    pub async fn send_heartbeats(&self) -> Result<(), NodeError> {
        self.maintain_own_entry()?;
        self.session_keys.prune(now_millis());

        if let Some(update) = self.own_link_state_update() {
            let peers = self.peers();
            debug!(peers = peers.len(), "sending heartbeats");

            join_all(peers.iter().map(|peer| {
                self.tell(
                    peer,
                    PeerMessageContent::LinkStateUpdate {
                        signed_node_info: update.clone(),
                    },
                )
            }))
            .await;
        }

        self.resend_peering_requests().await;
        Ok(())
    }

    /// Starts the flooding, heartbeat, peering and refresh loops. They all
    /// stop once `shutdown` turns true.
    pub fn spawn_tasks(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let protocol = self.config.protocol.clone();

        let flood = {
            let node = self.clone();
            let mut shutdown = shutdown.clone();
            let period = Duration::from_millis(protocol.retransmit_check_interval);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            // A slow peer must not delay the next tick.
                            let node = node.clone();
                            tokio::spawn(async move {
                                if let Err(e) = node.forward_link_state_updates().await {
                                    warn!("Failed to forward link state updates: {}", e);
                                }
                            });
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("flood task stopped");
            })
        };

        let heartbeat = {
            let node = self.clone();
            let mut shutdown = shutdown.clone();
            let (min, max) = (protocol.min_heartbeat_interval, protocol.max_heartbeat_interval);
            tokio::spawn(async move {
                loop {
                    let delay = rand::thread_rng().gen_range(min..=max);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {
                            if let Err(e) = node.send_heartbeats().await {
                                warn!("Failed to send heartbeats: {}", e);
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("heartbeat task stopped");
            })
        };

        let peering = {
            let node = self.clone();
            let mut shutdown = shutdown.clone();
            let period = Duration::from_millis(protocol.peering_check_interval);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = node.add_peers_if_necessary().await {
                                warn!("Failed to add peers: {}", e);
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("peering task stopped");
            })
        };

        let refresh = {
            let node = self.clone();
            let mut shutdown = shutdown;
            let period = Duration::from_millis(protocol.node_refresh_interval);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = node.refresh_node_state().await {
                                warn!("Failed to refresh node state: {}", e);
                            }
                            if let Err(e) = node.discover_nodes().await {
                                warn!("Failed to discover nodes: {}", e);
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
                debug!("refresh task stopped");
            })
        };

        info!("background tasks started");
        vec![flood, heartbeat, peering, refresh]
    }
}
