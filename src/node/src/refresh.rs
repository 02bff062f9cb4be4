//! Link-state lookups: refreshing stale nodes and discovering referenced ones.

use crate::errors::NodeError;
use crate::Node;
use overlay_core::crypto::verify_signed_node_info;
use overlay_core::link_state::{process_link_state, LinkStateOutcome, RetransmitPolicy};
use overlay_core::node_table::NodeTableEntry;
use overlay_core::types::{now_millis, NodeId};
use overlay_network::types::{LinkStateLookup, PeerMessageContent, PeerMessageResponse};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, warn};

impl Node {
    /// Asks `oracle` for its copy of `subject`'s signed advertisement.
    pub async fn query_link_state(&self, oracle: &NodeId, subject: &NodeId) -> Result<Option<Vec<u8>>, NodeError> {
        let response = self
            .send_peer_message(
                oracle,
                PeerMessageContent::LinkStateRequest {
                    node_ids: vec![*subject],
                },
            )
            .await?;

        match response {
            PeerMessageResponse::LinkState(lookups) => Ok(lookups.into_iter().next().and_then(|lookup| match lookup {
                LinkStateLookup::Found(bytes) => Some(bytes),
                LinkStateLookup::NotFound(_) => None,
            })),
            other => Err(NodeError::InvalidMessage(format!(
                "unexpected response to link state request: {:?}",
                other
            ))),
        }
    }

    /// Queries `oracle` for `subject` and ingests a valid answer without
    /// relaying it. Unknown subjects are added to the node table first.
    pub async fn refresh_node(&self, subject: &NodeId, oracle: &NodeId) -> Result<LinkStateOutcome, NodeError> {
        let bytes = match self.query_link_state(oracle, subject).await? {
            Some(bytes) => bytes,
            None => {
                debug!(subject = ?subject, oracle = ?oracle, "oracle has no link state for node");
                return Ok(LinkStateOutcome::UnknownNode);
            }
        };

        let info = verify_signed_node_info(&bytes)?;
        if info.node_id != *subject {
            return Err(NodeError::InvalidMessage(format!(
                "asked {} for {} but got link state of {}",
                oracle, subject, info.node_id
            )));
        }

        let mut table = self.node_table();
        table.add_node(NodeTableEntry::new(
            info.node_id,
            info.node_public_key,
            info.url.clone(),
            info.alias.clone(),
        ));

        let outcome = process_link_state(&mut table, &info, &bytes, RetransmitPolicy::Never, &self.policy, now_millis())?;
        debug!(subject = ?subject, oracle = ?oracle, outcome = ?outcome, "refreshed node state");

        Ok(outcome)
    }

    /// Refreshes one random node whose link state is missing or stale.
    pub async fn refresh_node_state(&self) -> Result<(), NodeError> {
        let oldest_acceptable = now_millis().saturating_sub(self.config.protocol.node_stale_timeout);
        let mut current_nodes = Vec::new();
        let mut old_nodes = Vec::new();

        for entry in self.node_table().iter() {
            if entry.node_id == self.node_id {
                continue;
            }

            match &entry.link_state {
                Some(link_state) if link_state.sequence > oldest_acceptable => current_nodes.push(entry.node_id),
                Some(_) => old_nodes.push((entry.node_id, true)),
                None => old_nodes.push((entry.node_id, false)),
            }
        }

        let (subject, oracle) = {
            let mut rng = rand::thread_rng();

            let (subject, has_link_state) = match old_nodes.choose(&mut rng) {
                Some(node) => *node,
                None => return Ok(()),
            };

            let mut oracle = subject;
            if !has_link_state || rng.gen_bool(self.config.protocol.indirect_query_probability) {
                let queryable: Vec<NodeId> = current_nodes
                    .iter()
                    .chain(self.bootstrap_nodes.iter())
                    .copied()
                    .collect();

                if let Some(node_id) = queryable.choose(&mut rng) {
                    oracle = *node_id;
                }
            }

            (subject, oracle)
        };

        match self.refresh_node(&subject, &oracle).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(subject = ?subject, oracle = ?oracle, error = %e, "failed to refresh node state");
                Ok(())
            }
        }
    }

    /// Looks up nodes the route computer found referenced but unknown.
    pub async fn discover_nodes(&self) -> Result<(), NodeError> {
        while let Some(subject) = self.discovery.pop() {
            if self.node_table().contains(&subject) {
                continue;
            }

            let oracle = {
                let oldest_acceptable = now_millis().saturating_sub(self.config.protocol.node_stale_timeout);
                let queryable: Vec<NodeId> = self
                    .node_table()
                    .iter()
                    .filter(|entry| entry.node_id != self.node_id)
                    .filter(|entry| {
                        entry
                            .link_state
                            .as_ref()
                            .map(|link_state| link_state.sequence > oldest_acceptable)
                            .unwrap_or(false)
                    })
                    .map(|entry| entry.node_id)
                    .collect();

                queryable.choose(&mut rand::thread_rng()).copied()
            };

            let oracle = match oracle {
                Some(oracle) => oracle,
                None => {
                    self.discovery.push(subject);
                    return Ok(());
                }
            };

            if let Err(e) = self.refresh_node(&subject, &oracle).await {
                warn!(subject = ?subject, oracle = ?oracle, error = %e, "failed to discover node");
            }
        }

        Ok(())
    }
}
