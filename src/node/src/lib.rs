//! Routing node for the overlay network.
//!
//! A [`Node`] owns the node table and everything that reacts to it: the route
//! computer, the session keys, the peering state machine and the flooding,
//! heartbeat and refresh tasks. Incoming messages enter through
//! [`Node::handle_peer_message`]; outgoing messages leave through the
//! [`Transport`] the node was built with.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod messenger;
pub mod metrics;
pub mod peering;
pub mod refresh;
pub mod server;
pub mod tasks;

use config::NodeConfig;
use errors::NodeError;
use metrics::TableMetrics;
use overlay_core::crypto::NodeKeypair;
use overlay_core::link_state::{maintain_own_entry, LinkStatePolicy, OwnNodeDescriptor};
use overlay_core::node_table::{NodeTable, NodeUpdate, PeerState};
use overlay_core::routing::{DiscoveryQueue, RouteComputer, RoutingTable, RoutingTableHandle};
use overlay_core::types::{now_millis, NodeId, Sequence, SubnetId};
use overlay_network::session::SessionKeyManager;
use overlay_network::transport::Transport;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Receives payment packets addressed to this node.
pub trait PacketSink: Send + Sync {
    fn handle_packet(&self, from: &NodeId, packet: Vec<u8>);
}

/// Receives settlement traffic for the subnets this node supports.
pub trait SubnetModule: Send + Sync {
    fn handle_settlement(&self, from: &NodeId, subnet_id: &SubnetId, amount: u64, proof: Vec<u8>);
    fn handle_message(&self, from: &NodeId, subnet_id: &SubnetId, message: Vec<u8>);
}

/// Logs and drops every packet.
#[derive(Debug, Default)]
pub struct DiscardingPacketSink;

impl PacketSink for DiscardingPacketSink {
    fn handle_packet(&self, from: &NodeId, packet: Vec<u8>) {
        debug!(from = ?from, bytes = packet.len(), "dropping interledger packet, no packet sink configured");
    }
}

/// Logs and drops all subnet traffic.
#[derive(Debug, Default)]
pub struct DiscardingSubnetModule;

impl SubnetModule for DiscardingSubnetModule {
    fn handle_settlement(&self, from: &NodeId, subnet_id: &SubnetId, amount: u64, _proof: Vec<u8>) {
        debug!(from = ?from, subnet = %subnet_id, amount, "dropping settlement, no subnet module configured");
    }

    fn handle_message(&self, from: &NodeId, subnet_id: &SubnetId, message: Vec<u8>) {
        debug!(from = ?from, subnet = %subnet_id, bytes = message.len(), "dropping subnet message, no subnet module configured");
    }
}

/// A routing node.
pub struct Node {
    config: NodeConfig,
    keypair: NodeKeypair,
    node_id: NodeId,
    subnets: Vec<SubnetId>,
    bootstrap_nodes: Vec<NodeId>,
    policy: LinkStatePolicy,
    node_table: Mutex<NodeTable>,
    routes: RoutingTableHandle,
    discovery: DiscoveryQueue,
    session_keys: SessionKeyManager,
    transport: Arc<dyn Transport>,
    packet_sink: Arc<dyn PacketSink>,
    subnet_module: Arc<dyn SubnetModule>,
}

impl Node {
    /// Creates a node, seeds its table with the bootstrap nodes and issues its
    /// first advertisement.
    pub fn new(config: NodeConfig, keypair: NodeKeypair, transport: Arc<dyn Transport>) -> Result<Self, NodeError> {
        config.protocol.validate()?;

        let node_id = keypair.node_id();
        let routes = RoutingTableHandle::new();
        let discovery = DiscoveryQueue::new();

        let mut table = NodeTable::new();
        table.subscribe(Box::new(RouteComputer::new(node_id, routes.clone(), discovery.clone())));
        table.subscribe(Box::new(TableMetrics::new(routes.clone())));

        let mut bootstrap_nodes = Vec::new();
        for bootstrap in &config.bootstrap_nodes {
            let entry = bootstrap.to_entry()?;
            if entry.node_id == node_id {
                continue;
            }
            bootstrap_nodes.push(entry.node_id);
            table.add_node(entry);
        }

        let node = Self {
            subnets: config.subnet_ids(),
            policy: config.protocol.link_state_policy(),
            session_keys: SessionKeyManager::new(keypair.x25519_secret(), config.protocol.session_key_lifetime),
            config,
            keypair,
            node_id,
            bootstrap_nodes,
            node_table: Mutex::new(table),
            routes,
            discovery,
            transport,
            packet_sink: Arc::new(DiscardingPacketSink),
            subnet_module: Arc::new(DiscardingSubnetModule),
        };

        node.maintain_own_entry()?;
        info!(
            node_id = %node.node_id,
            url = %node.config.url,
            bootstrap_nodes = node.bootstrap_nodes.len(),
            "node initialized"
        );

        Ok(node)
    }

    pub fn with_packet_sink(mut self, packet_sink: Arc<dyn PacketSink>) -> Self {
        self.packet_sink = packet_sink;
        self
    }

    pub fn with_subnet_module(mut self, subnet_module: Arc<dyn SubnetModule>) -> Self {
        self.subnet_module = subnet_module;
        self
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Locks the node table. Must never be held across an await point.
    pub fn node_table(&self) -> MutexGuard<'_, NodeTable> {
        self.node_table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current routing table.
    pub fn routing_table(&self) -> Arc<RoutingTable> {
        self.routes.snapshot()
    }

    pub fn discovery_queue(&self) -> &DiscoveryQueue {
        &self.discovery
    }

    pub fn peers(&self) -> BTreeSet<NodeId> {
        self.node_table().peers()
    }

    /// Returns our own signed advertisement.
    pub fn own_link_state_update(&self) -> Option<Vec<u8>> {
        self.node_table()
            .get(&self.node_id)
            .and_then(|entry| entry.link_state.as_ref())
            .map(|link_state| link_state.last_update.clone())
    }

    /// Re-issues our own advertisement if the peer set, the subnets or the
    /// heartbeat interval require it.
    pub fn maintain_own_entry(&self) -> Result<Option<Sequence>, NodeError> {
        let mut table = self.node_table();
        self.maintain_own_entry_locked(&mut table)
    }

    fn maintain_own_entry_locked(&self, table: &mut NodeTable) -> Result<Option<Sequence>, NodeError> {
        let peers = table.peers();
        let own = OwnNodeDescriptor {
            keypair: &self.keypair,
            url: &self.config.url,
            alias: &self.config.alias,
            peers: &peers,
            subnets: &self.subnets,
        };

        Ok(maintain_own_entry(table, &own, &self.policy, now_millis())?)
    }

    /// Moves a node to a new peer state and re-issues our advertisement when
    /// the peer set changed.
    pub(crate) fn set_peer_state(
        &self,
        table: &mut NodeTable,
        node_id: &NodeId,
        peer_state: PeerState,
    ) -> Result<(), NodeError> {
        table.update_node(node_id, NodeUpdate::peer_state(peer_state))?;
        self.maintain_own_entry_locked(table)?;
        Ok(())
    }
}
