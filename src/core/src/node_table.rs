//! The node table: the authoritative local store of known nodes.
//!
//! All mutation goes through [`NodeTable::add_node`] and
//! [`NodeTable::update_node`]. Each successful mutation is announced to the
//! registered [`NodeTableObserver`]s synchronously, before the call returns.

use crate::errors::CoreError;
use crate::types::{NodeId, PublicKeyBytes, Sequence, SubnetId, Timestamp};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// When a stored link-state update will be relayed to our peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetransmitTime {
    /// Relay once this wall clock time (ms) has been reached.
    At(Timestamp),
    /// Never relay.
    Never,
}

impl RetransmitTime {
    pub fn is_due(&self, now: Timestamp) -> bool {
        match self {
            RetransmitTime::At(time) => *time <= now,
            RetransmitTime::Never => false,
        }
    }
}

/// Latest known link state of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkState {
    /// Sequence number of the most recent update
    pub sequence: Sequence,
    /// Nodes the originator claims adjacency to
    pub neighbors: BTreeSet<NodeId>,
    /// Subnets the originator supports
    pub subnets: Vec<SubnetId>,
    /// Verbatim signed advertisement, relayed without re-serialization
    pub last_update: Vec<u8>,
    /// How many times this exact sequence number has been received
    pub update_received_counter: u32,
    /// When the update is due for retransmission
    pub scheduled_retransmit_time: RetransmitTime,
}

/// Peering relationship between this node and another node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerState {
    None,
    RequestPeering {
        last_seen: Timestamp,
        subnet_id: SubnetId,
    },
    Peered {
        last_seen: Timestamp,
        subnet_id: SubnetId,
    },
}

impl PeerState {
    pub fn is_peered(&self) -> bool {
        matches!(self, PeerState::Peered { .. })
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::None => write!(f, "none"),
            PeerState::RequestPeering { subnet_id, .. } => write!(f, "request-peering({})", subnet_id),
            PeerState::Peered { subnet_id, .. } => write!(f, "peered({})", subnet_id),
        }
    }
}

/// A single node known to this node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeTableEntry {
    /// ID of the node, unique within the network
    pub node_id: NodeId,
    /// The node's Ed25519 public key
    pub node_public_key: PublicKeyBytes,
    /// Where the node can be reached
    pub url: String,
    /// Display name, unverified and for debugging only
    pub alias: String,
    /// Latest accepted link state, if any
    pub link_state: Option<LinkState>,
    /// Peering relationship with this node
    pub peer_state: PeerState,
}

impl NodeTableEntry {
    /// Creates an entry for a node we have no link state for yet.
    pub fn new(node_id: NodeId, node_public_key: PublicKeyBytes, url: String, alias: String) -> Self {
        Self {
            node_id,
            node_public_key,
            url,
            alias,
            link_state: None,
            peer_state: PeerState::None,
        }
    }
}

/// A partial update to a node table entry. Fields left as `None` are kept.
#[derive(Clone, Debug, Default)]
pub struct NodeUpdate {
    pub link_state: Option<LinkState>,
    pub peer_state: Option<PeerState>,
    pub url: Option<String>,
    pub alias: Option<String>,
    pub public_key: Option<PublicKeyBytes>,
}

impl NodeUpdate {
    pub fn link_state(link_state: LinkState) -> Self {
        Self {
            link_state: Some(link_state),
            ..Default::default()
        }
    }

    pub fn peer_state(peer_state: PeerState) -> Self {
        Self {
            peer_state: Some(peer_state),
            ..Default::default()
        }
    }

    pub fn with_contact(mut self, url: String, alias: String) -> Self {
        self.url = Some(url);
        self.alias = Some(alias);
        self
    }
}

/// Change notification emitted after every successful mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeTableEvent {
    NodeAdded {
        node_id: NodeId,
    },
    NodeUpdated {
        node_id: NodeId,
        /// The neighbor set of the node changed
        topology_changed: bool,
        /// The node moved to a different peering state
        peer_state_changed: bool,
    },
}

impl NodeTableEvent {
    pub fn node_id(&self) -> &NodeId {
        match self {
            NodeTableEvent::NodeAdded { node_id } => node_id,
            NodeTableEvent::NodeUpdated { node_id, .. } => node_id,
        }
    }

    /// Whether routes computed before this event may be wrong now.
    pub fn affects_topology(&self) -> bool {
        match self {
            NodeTableEvent::NodeAdded { .. } => true,
            NodeTableEvent::NodeUpdated { topology_changed, .. } => *topology_changed,
        }
    }
}

/// Receives node table change events.
///
/// Observers run while the table is being mutated, so they only get shared
/// access to it and must not block.
pub trait NodeTableObserver: Send + Sync {
    fn on_event(&self, event: &NodeTableEvent, table: &NodeTable);
}

/// The node table.
#[derive(Default)]
pub struct NodeTable {
    entries: HashMap<NodeId, NodeTableEntry>,
    observers: Vec<Box<dyn NodeTableObserver>>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer. Observers are notified in registration order.
    pub fn subscribe(&mut self, observer: Box<dyn NodeTableObserver>) {
        self.observers.push(observer);
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&NodeTableEntry> {
        self.entries.get(node_id)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.entries.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeTableEntry> {
        self.entries.values()
    }

    /// Returns the IDs of all nodes we are peered with.
    pub fn peers(&self) -> BTreeSet<NodeId> {
        self.entries
            .values()
            .filter(|entry| entry.peer_state.is_peered())
            .map(|entry| entry.node_id)
            .collect()
    }

    /// Adds a node. Returns `false` and changes nothing if it is already known.
    pub fn add_node(&mut self, entry: NodeTableEntry) -> bool {
        if self.entries.contains_key(&entry.node_id) {
            return false;
        }

        let node_id = entry.node_id;
        self.entries.insert(node_id, entry);
        self.emit(NodeTableEvent::NodeAdded { node_id });

        true
    }

    /// Applies a partial update to an existing node.
    pub fn update_node(&mut self, node_id: &NodeId, update: NodeUpdate) -> Result<(), CoreError> {
        let entry = self
            .entries
            .get_mut(node_id)
            .ok_or(CoreError::NodeNotFound(*node_id))?;

        let previous_neighbors = entry.link_state.as_ref().map(|ls| ls.neighbors.clone());
        let previous_peer_state = entry.peer_state.clone();

        if let Some(link_state) = update.link_state {
            entry.link_state = Some(link_state);
        }
        if let Some(peer_state) = update.peer_state {
            entry.peer_state = peer_state;
        }
        if let Some(url) = update.url {
            entry.url = url;
        }
        if let Some(alias) = update.alias {
            entry.alias = alias;
        }
        if let Some(public_key) = update.public_key {
            entry.node_public_key = public_key;
        }

        let topology_changed =
            previous_neighbors != entry.link_state.as_ref().map(|ls| ls.neighbors.clone());
        let peer_state_changed =
            std::mem::discriminant(&previous_peer_state) != std::mem::discriminant(&entry.peer_state);

        self.emit(NodeTableEvent::NodeUpdated {
            node_id: *node_id,
            topology_changed,
            peer_state_changed,
        });

        Ok(())
    }

    fn emit(&self, event: NodeTableEvent) {
        for observer in &self.observers {
            observer.on_event(&event, self);
        }
    }
}

impl fmt::Debug for NodeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTable")
            .field("entries", &self.entries.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}
