//! Outgoing side of the peering state machine.
//!
//! A node below its minimum peer count picks a random candidate that shares a
//! subnet, moves it to `RequestPeering` and asks it to peer. An accepted
//! request, or a peering request from the other side, moves it to `Peered`.
//! Nothing ever moves a node back.

use crate::errors::NodeError;
use crate::Node;
use futures::future::join_all;
use overlay_core::node_table::PeerState;
use overlay_core::types::{now_millis, NodeId, SubnetId};
use overlay_network::types::{PeerMessageContent, PeerMessageResponse};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

impl Node {
    /// Picks a random node we could peer with, and the subnet to peer on.
    pub fn peering_candidate(&self) -> Option<(NodeId, SubnetId)> {
        let table = self.node_table();

        let candidates: Vec<(NodeId, SubnetId)> = table
            .iter()
            .filter(|entry| entry.node_id != self.node_id && entry.peer_state == PeerState::None)
            .filter_map(|entry| {
                let link_state = entry.link_state.as_ref()?;
                let common = link_state.subnets.iter().find(|subnet| self.subnets.contains(subnet))?;
                Some((entry.node_id, common.clone()))
            })
            .collect();

        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    /// Requests a new peering if we have fewer peers than configured.
    pub async fn add_peers_if_necessary(&self) -> Result<(), NodeError> {
        if self.peers().len() >= self.config.min_peers {
            return Ok(());
        }

        let (node_id, subnet_id) = match self.peering_candidate() {
            Some(candidate) => candidate,
            None => return Ok(()),
        };

        self.request_peering(&node_id, subnet_id).await?;
        Ok(())
    }

    /// Asks a node to peer with us on a subnet. Returns whether it accepted.
    pub async fn request_peering(&self, node_id: &NodeId, subnet_id: SubnetId) -> Result<bool, NodeError> {
        let node_info = match self.own_link_state_update() {
            Some(node_info) => node_info,
            None => {
                warn!("node table does not contain own link state");
                return Ok(false);
            }
        };

        {
            let mut table = self.node_table();
            let peer_state = table
                .get(node_id)
                .map(|entry| entry.peer_state.clone())
                .ok_or(NodeError::UnknownDestination(*node_id))?;

            match peer_state {
                PeerState::None | PeerState::RequestPeering { .. } => self.set_peer_state(
                    &mut table,
                    node_id,
                    PeerState::RequestPeering {
                        last_seen: now_millis(),
                        subnet_id: subnet_id.clone(),
                    },
                )?,
                PeerState::Peered { .. } => return Ok(true),
            }
        }

        debug!(to = ?node_id, subnet = %subnet_id, "sending peering request");

        let response = self
            .send_peer_message(
                node_id,
                PeerMessageContent::PeeringRequest {
                    subnet_id: subnet_id.clone(),
                    node_info,
                },
            )
            .await?;

        match response {
            PeerMessageResponse::Peering { accepted: true } => {
                let mut table = self.node_table();
                self.set_peer_state(
                    &mut table,
                    node_id,
                    PeerState::Peered {
                        last_seen: now_millis(),
                        subnet_id: subnet_id.clone(),
                    },
                )?;
                info!(peer = ?node_id, subnet = %subnet_id, "peering request accepted");
                Ok(true)
            }
            PeerMessageResponse::Peering { accepted: false } => {
                debug!(to = ?node_id, "peering request rejected");
                Ok(false)
            }
            other => Err(NodeError::InvalidMessage(format!(
                "unexpected response to peering request: {:?}",
                other
            ))),
        }
    }

    /// Re-sends the peering request to every node still in `RequestPeering`.
    pub async fn resend_peering_requests(&self) {
        let pending: Vec<(NodeId, SubnetId)> = self
            .node_table()
            .iter()
            .filter_map(|entry| match &entry.peer_state {
                PeerState::RequestPeering { subnet_id, .. } => Some((entry.node_id, subnet_id.clone())),
                _ => None,
            })
            .collect();

        // A stalled node must not hold up the requests to the others.
        join_all(pending.into_iter().map(|(node_id, subnet_id)| async move {
            if let Err(e) = self.request_peering(&node_id, subnet_id).await {
                warn!(to = ?node_id, error = %e, "failed to resend peering request");
            }
        }))
        .await;
    }
}
