//! Core primitives for the overlay routing node.
//!
//! This crate provides node identities and signed advertisements, the node
//! table with its change observers, the link-state flooding rules and the
//! shortest-path route computation. Nothing in here performs I/O.

pub mod crypto;
pub mod errors;
pub mod link_state;
pub mod node_table;
pub mod routing;
pub mod types;

// Re-export commonly used types
pub use crypto::{sign_node_info, verify_signed_node_info, x25519_public_from_ed25519, NodeKeypair};
pub use errors::CoreError;
pub use link_state::{
    maintain_own_entry, process_link_state, take_due_retransmissions, LinkStateOutcome, LinkStatePolicy,
    OwnNodeDescriptor, PendingRetransmission, RetransmitPolicy,
};
pub use node_table::{
    LinkState, NodeTable, NodeTableEntry, NodeTableEvent, NodeTableObserver, NodeUpdate, PeerState, RetransmitTime,
};
pub use routing::{compute_routes, DiscoveryQueue, RouteComputer, RoutingTable, RoutingTableEntry, RoutingTableHandle};
pub use types::{now_millis, NodeId, NodeInfo, NodeInfoEntry, PublicKeyBytes, Sequence, SignedNodeInfo, SubnetId, Timestamp};
