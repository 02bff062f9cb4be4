//! Incoming peer messages.

use crate::errors::NodeError;
use crate::metrics::{AUTHENTICATION_FAILURES, LINK_STATE_UPDATES, PEER_MESSAGES_RECEIVED};
use crate::Node;
use overlay_core::crypto::verify_signed_node_info;
use overlay_core::link_state::{process_link_state, LinkStateOutcome, RetransmitPolicy};
use overlay_core::node_table::{NodeTableEntry, NodeUpdate, PeerState};
use overlay_core::types::{now_millis, NodeId, SubnetId};
use overlay_network::auth::{authenticate_message, is_anonymous_allowed};
use overlay_network::types::{LinkStateLookup, PeerMessage, PeerMessageContent, PeerMessageResponse};
use tracing::{debug, info, warn};

fn outcome_label(outcome: LinkStateOutcome) -> &'static str {
    match outcome {
        LinkStateOutcome::UnknownNode => "unknown",
        LinkStateOutcome::Duplicate { .. } => "duplicate",
        LinkStateOutcome::Stale => "stale",
        LinkStateOutcome::Updated => "updated",
    }
}

impl Node {
    /// Processes one serialized envelope and returns the serialized response.
    ///
    /// Parse errors and unauthenticated messages are returned as errors and
    /// never reach the message handlers.
    pub fn handle_peer_message(&self, bytes: &[u8]) -> Result<Vec<u8>, NodeError> {
        let message = PeerMessage::from_bytes(bytes)?;
        let content = PeerMessageContent::from_bytes(&message.content)?;
        let message_type = content.message_type();

        PEER_MESSAGES_RECEIVED.with_label_values(&[message_type.as_str()]).inc();

        let authenticated = {
            let table = self.node_table();
            authenticate_message(&self.session_keys, &message, table.get(&message.sender), now_millis())
        };

        if !authenticated && !is_anonymous_allowed(message_type) {
            AUTHENTICATION_FAILURES.inc();
            debug!(
                from = ?message.sender,
                message_type = %message_type,
                "incoming peer message is not authenticated, ignoring"
            );
            return Err(NodeError::Unauthenticated(message.sender));
        }

        let sender = message.sender;
        let response = match content {
            PeerMessageContent::PeeringRequest { subnet_id, node_info } => {
                self.handle_peering_request(&sender, subnet_id, &node_info)?
            }
            PeerMessageContent::LinkStateUpdate { signed_node_info } => {
                self.handle_link_state_update(&sender, &signed_node_info)?
            }
            PeerMessageContent::LinkStateRequest { node_ids } => self.handle_link_state_request(&node_ids),
            PeerMessageContent::InterledgerPacket { packet } => {
                self.packet_sink.handle_packet(&sender, packet);
                PeerMessageResponse::Acknowledged
            }
            PeerMessageContent::Settlement {
                subnet_id,
                amount,
                proof,
            } => {
                self.subnet_module.handle_settlement(&sender, &subnet_id, amount, proof);
                PeerMessageResponse::Acknowledged
            }
            PeerMessageContent::SubnetModuleMessage { subnet_id, message } => {
                self.subnet_module.handle_message(&sender, &subnet_id, message);
                PeerMessageResponse::Acknowledged
            }
        };

        Ok(response.to_bytes()?)
    }

    /// Accepts a peering request if we support the requested subnet.
    ///
    /// There is no admission control beyond the subnet check.
    fn handle_peering_request(
        &self,
        sender: &NodeId,
        subnet_id: SubnetId,
        node_info: &[u8],
    ) -> Result<PeerMessageResponse, NodeError> {
        let info = verify_signed_node_info(node_info)?;

        if info.node_id != *sender {
            return Err(NodeError::InvalidMessage(format!(
                "peering request from {} carries advertisement of {}",
                sender, info.node_id
            )));
        }

        if !self.subnets.contains(&subnet_id) {
            debug!(from = ?sender, subnet = %subnet_id, "rejecting peering request for unsupported subnet");
            return Ok(PeerMessageResponse::Peering { accepted: false });
        }

        let now = now_millis();
        let mut table = self.node_table();

        table.add_node(NodeTableEntry::new(
            info.node_id,
            info.node_public_key,
            info.url.clone(),
            info.alias.clone(),
        ));
        process_link_state(&mut table, &info, node_info, RetransmitPolicy::Never, &self.policy, now)?;

        let was_peered = table.get(sender).map(|entry| entry.peer_state.is_peered()).unwrap_or(false);
        self.set_peer_state(
            &mut table,
            sender,
            PeerState::Peered {
                last_seen: now,
                subnet_id: subnet_id.clone(),
            },
        )?;

        if !was_peered {
            info!(peer = ?sender, subnet = %subnet_id, url = %info.url, "accepted peering request");
        }

        Ok(PeerMessageResponse::Peering { accepted: true })
    }

    fn handle_link_state_update(&self, sender: &NodeId, signed_node_info: &[u8]) -> Result<PeerMessageResponse, NodeError> {
        let info = match verify_signed_node_info(signed_node_info) {
            Ok(info) => info,
            Err(e) => {
                warn!(from = ?sender, error = %e, "received invalid link state update");
                return Err(e.into());
            }
        };

        let now = now_millis();
        let mut table = self.node_table();

        // A peer's own advertisement doubles as a sign of life.
        if info.node_id == *sender {
            if let Some(PeerState::Peered { subnet_id, .. }) = table.get(sender).map(|entry| entry.peer_state.clone()) {
                table.update_node(
                    sender,
                    NodeUpdate::peer_state(PeerState::Peered {
                        last_seen: now,
                        subnet_id,
                    }),
                )?;
            }
        }

        let outcome = process_link_state(
            &mut table,
            &info,
            signed_node_info,
            RetransmitPolicy::Scheduled,
            &self.policy,
            now,
        )?;
        LINK_STATE_UPDATES.with_label_values(&[outcome_label(outcome)]).inc();

        debug!(
            from = ?sender,
            origin = ?info.node_id,
            sequence = info.sequence,
            outcome = ?outcome,
            "processed link state update"
        );

        Ok(PeerMessageResponse::Acknowledged)
    }

    fn handle_link_state_request(&self, node_ids: &[NodeId]) -> PeerMessageResponse {
        let table = self.node_table();

        let lookups = node_ids
            .iter()
            .map(|node_id| {
                match table.get(node_id).and_then(|entry| entry.link_state.as_ref()) {
                    Some(link_state) => LinkStateLookup::Found(link_state.last_update.clone()),
                    None => LinkStateLookup::NotFound(*node_id),
                }
            })
            .collect();

        PeerMessageResponse::LinkState(lookups)
    }
}
