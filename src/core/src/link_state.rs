//! Link-state ingestion, own advertisement maintenance and retransmission
//! selection.
//!
//! These functions operate on a borrowed [`NodeTable`] and never perform I/O.
//! The node runtime decides when to call them and what to send afterwards.

use crate::crypto::{sign_node_info, NodeKeypair};
use crate::errors::CoreError;
use crate::node_table::{LinkState, NodeTable, NodeTableEntry, NodeUpdate, RetransmitTime};
use crate::types::{NodeId, NodeInfo, NodeInfoEntry, Sequence, SubnetId, Timestamp};
use rand::Rng;
use std::collections::BTreeSet;
use tracing::debug;

/// How a freshly accepted link-state update is scheduled for relaying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetransmitPolicy {
    /// Relay on the next flood tick. Used for our own advertisement.
    Immediately,
    /// Relay after a random delay. Used for organically received gossip.
    Scheduled,
    /// Never relay. Used for answers to our own queries.
    Never,
}

/// Tunable constants of the flooding protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkStatePolicy {
    /// Updates received this many times are no longer relayed
    pub counter_threshold: u32,
    /// Upper bound of the random relay delay in milliseconds
    pub max_retransmit_delay: u64,
    /// Our own advertisement is re-issued when older than this (ms)
    pub max_update_interval: u64,
}

impl Default for LinkStatePolicy {
    fn default() -> Self {
        Self {
            counter_threshold: 3,
            max_retransmit_delay: 500,
            max_update_interval: 48 * 60 * 60 * 1000,
        }
    }
}

impl LinkStatePolicy {
    fn retransmit_time(&self, retransmit: RetransmitPolicy, now: Timestamp) -> RetransmitTime {
        match retransmit {
            RetransmitPolicy::Immediately => RetransmitTime::At(now),
            RetransmitPolicy::Scheduled => {
                let delay = rand::thread_rng().gen_range(0..=self.max_retransmit_delay);
                RetransmitTime::At(now.saturating_add(delay))
            }
            RetransmitPolicy::Never => RetransmitTime::Never,
        }
    }
}

/// What [`process_link_state`] did with an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStateOutcome {
    /// The originator is not in the node table; nothing changed.
    UnknownNode,
    /// The update repeats the stored sequence and was counted.
    Duplicate { counter: u32 },
    /// The update is not newer than the stored one; nothing changed.
    Stale,
    /// The update replaced the stored link state.
    Updated,
}

/// Ingests a verified node advertisement.
///
/// `raw` is the signed advertisement exactly as received and is stored for
/// verbatim relaying.
pub fn process_link_state(
    table: &mut NodeTable,
    info: &NodeInfo,
    raw: &[u8],
    retransmit: RetransmitPolicy,
    policy: &LinkStatePolicy,
    now: Timestamp,
) -> Result<LinkStateOutcome, CoreError> {
    let current = match table.get(&info.node_id) {
        Some(entry) => entry.link_state.clone(),
        None => return Ok(LinkStateOutcome::UnknownNode),
    };

    if let Some(mut current) = current {
        if info.sequence == current.sequence && retransmit == RetransmitPolicy::Scheduled {
            current.update_received_counter = current.update_received_counter.saturating_add(1);
            let counter = current.update_received_counter;
            table.update_node(&info.node_id, NodeUpdate::link_state(current))?;
            return Ok(LinkStateOutcome::Duplicate { counter });
        }

        if info.sequence <= current.sequence {
            return Ok(LinkStateOutcome::Stale);
        }
    }

    let link_state = LinkState {
        sequence: info.sequence,
        neighbors: info.neighbors().copied().collect(),
        subnets: info.subnets().cloned().collect(),
        last_update: raw.to_vec(),
        update_received_counter: 1,
        scheduled_retransmit_time: policy.retransmit_time(retransmit, now),
    };

    let mut update = NodeUpdate::link_state(link_state).with_contact(info.url.clone(), info.alias.clone());
    update.public_key = Some(info.node_public_key);

    table.update_node(&info.node_id, update)?;

    Ok(LinkStateOutcome::Updated)
}

/// A stored update that is due for relaying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRetransmission {
    /// Originator of the update
    pub origin: NodeId,
    pub sequence: Sequence,
    /// The signed advertisement bytes
    pub update: Vec<u8>,
}

/// Collects every update that is due for relaying and marks each of them as
/// never to be relayed again.
pub fn take_due_retransmissions(
    table: &mut NodeTable,
    policy: &LinkStatePolicy,
    now: Timestamp,
) -> Result<Vec<PendingRetransmission>, CoreError> {
    let due: Vec<(NodeId, LinkState)> = table
        .iter()
        .filter_map(|entry| {
            let link_state = entry.link_state.as_ref()?;
            (link_state.update_received_counter < policy.counter_threshold
                && link_state.scheduled_retransmit_time.is_due(now))
            .then(|| (entry.node_id, link_state.clone()))
        })
        .collect();

    let mut pending = Vec::with_capacity(due.len());
    for (origin, mut link_state) in due {
        pending.push(PendingRetransmission {
            origin,
            sequence: link_state.sequence,
            update: link_state.last_update.clone(),
        });

        link_state.scheduled_retransmit_time = RetransmitTime::Never;
        table.update_node(&origin, NodeUpdate::link_state(link_state))?;
    }

    Ok(pending)
}

/// Everything that goes into this node's own advertisement.
#[derive(Clone, Debug)]
pub struct OwnNodeDescriptor<'a> {
    pub keypair: &'a NodeKeypair,
    pub url: &'a str,
    pub alias: &'a str,
    pub peers: &'a BTreeSet<NodeId>,
    pub subnets: &'a [SubnetId],
}

/// Returns whether our own advertisement must be re-issued.
pub fn own_entry_needs_update(
    table: &NodeTable,
    own: &OwnNodeDescriptor<'_>,
    policy: &LinkStatePolicy,
    now: Timestamp,
) -> bool {
    let link_state = match table.get(&own.keypair.node_id()).and_then(|e| e.link_state.as_ref()) {
        Some(link_state) => link_state,
        None => return true,
    };

    let advertised: BTreeSet<&SubnetId> = link_state.subnets.iter().collect();
    let configured: BTreeSet<&SubnetId> = own.subnets.iter().collect();

    link_state.neighbors != *own.peers
        || advertised != configured
        || link_state.sequence < now.saturating_sub(policy.max_update_interval)
}

/// Re-issues our own advertisement if needed and stores it in the table.
///
/// Returns the new sequence number when an advertisement was issued.
pub fn maintain_own_entry(
    table: &mut NodeTable,
    own: &OwnNodeDescriptor<'_>,
    policy: &LinkStatePolicy,
    now: Timestamp,
) -> Result<Option<Sequence>, CoreError> {
    if !own_entry_needs_update(table, own, policy, now) {
        return Ok(None);
    }

    let node_id = own.keypair.node_id();
    let previous = table
        .get(&node_id)
        .and_then(|entry| entry.link_state.as_ref())
        .map(|ls| ls.sequence);

    // Sequence is the wall clock time but must always move forward.
    let sequence = now.max(previous.map_or(0, |s| s.saturating_add(1)));

    let entries = own
        .peers
        .iter()
        .map(|node_id| NodeInfoEntry::Neighbor { node_id: *node_id })
        .chain(own.subnets.iter().map(|subnet_id| NodeInfoEntry::Subnet {
            subnet_id: subnet_id.clone(),
        }))
        .collect();

    let info = NodeInfo {
        node_id,
        sequence,
        url: own.url.to_string(),
        alias: own.alias.to_string(),
        node_public_key: own.keypair.public_key(),
        entries,
    };
    let signed = sign_node_info(own.keypair, &info)?;

    debug!(
        sequence,
        neighbors = own.peers.len(),
        "{} own node table entry",
        if previous.is_some() { "updating" } else { "creating" }
    );

    table.add_node(NodeTableEntry::new(
        node_id,
        info.node_public_key,
        info.url.clone(),
        info.alias.clone(),
    ));
    process_link_state(table, &info, &signed, RetransmitPolicy::Immediately, policy, now)?;

    Ok(Some(sequence))
}
