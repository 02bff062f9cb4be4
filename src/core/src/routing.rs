//! Shortest-path route computation over the node table.
//!
//! Routes are recomputed from scratch after every topology-affecting node
//! table event. The search builds an Even-Shiloach tree, where each node keeps
//! every predecessor that reaches it on a shortest path, and then condenses
//! that tree into the set of first hops per destination.

use crate::node_table::{NodeTable, NodeTableEvent, NodeTableObserver};
use crate::types::NodeId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// Route towards a single destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingTableEntry {
    /// Hop count from this node
    pub distance: u32,
    /// Direct neighbors that start some shortest path to the destination
    pub first_hop_options: BTreeSet<NodeId>,
}

/// Routes to every reachable node, excluding this node itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<NodeId, RoutingTableEntry>,
}

impl RoutingTable {
    pub fn get(&self, node_id: &NodeId) -> Option<&RoutingTableEntry> {
        self.routes.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &RoutingTableEntry)> {
        self.routes.iter()
    }
}

struct SearchNode {
    level: u32,
    parents: BTreeSet<NodeId>,
}

/// Result of a single route computation.
#[derive(Debug, Default)]
pub struct ComputedRoutes {
    pub table: RoutingTable,
    /// Neighbors that were referenced by a link state but are not in the node table
    pub unknown_nodes: Vec<NodeId>,
}

/// Computes shortest-path routes from `own_id` over the advertised neighbor sets.
pub fn compute_routes(own_id: &NodeId, table: &NodeTable) -> ComputedRoutes {
    let mut search: HashMap<NodeId, SearchNode> = HashMap::new();
    let mut unknown_nodes = Vec::new();
    let mut queue = VecDeque::new();

    search.insert(
        *own_id,
        SearchNode {
            level: 0,
            parents: BTreeSet::new(),
        },
    );
    queue.push_back(*own_id);

    while let Some(current) = queue.pop_front() {
        let current_level = match search.get(&current) {
            Some(node) => node.level,
            None => continue,
        };

        let neighbors = match table.get(&current).and_then(|e| e.link_state.as_ref()) {
            Some(link_state) => &link_state.neighbors,
            None => continue,
        };

        for neighbor in neighbors {
            let next_level = current_level + 1;

            match search.get_mut(neighbor) {
                Some(existing) if existing.level > next_level => {
                    existing.level = next_level;
                    existing.parents = BTreeSet::from([current]);
                }
                Some(existing) if existing.level == next_level => {
                    existing.parents.insert(current);
                }
                Some(_) => {}
                None => {
                    search.insert(
                        *neighbor,
                        SearchNode {
                            level: next_level,
                            parents: BTreeSet::from([current]),
                        },
                    );

                    if table.contains(neighbor) {
                        queue.push_back(*neighbor);
                    } else {
                        unknown_nodes.push(*neighbor);
                    }
                }
            }
        }
    }

    let mut routes = BTreeMap::new();
    for (node_id, node) in &search {
        if node_id == own_id {
            continue;
        }

        let first_hop_options = if node.level == 1 {
            BTreeSet::from([*node_id])
        } else {
            let mut hops = node.parents.clone();
            for _ in 2..node.level {
                hops = hops
                    .iter()
                    .filter_map(|parent| search.get(parent))
                    .flat_map(|parent| parent.parents.iter().copied())
                    .collect();
            }
            hops
        };

        routes.insert(
            *node_id,
            RoutingTableEntry {
                distance: node.level,
                first_hop_options,
            },
        );
    }

    ComputedRoutes {
        table: RoutingTable { routes },
        unknown_nodes,
    }
}

/// Shared handle to the most recently published routing table.
///
/// Readers take a snapshot and never observe a partially built table.
#[derive(Clone, Debug, Default)]
pub struct RoutingTableHandle {
    current: Arc<RwLock<Arc<RoutingTable>>>,
}

impl RoutingTableHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn publish(&self, table: RoutingTable) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
    }
}

/// Node IDs waiting to be looked up because a link state referenced them.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryQueue {
    inner: Arc<Mutex<DiscoveryQueueInner>>,
}

#[derive(Debug, Default)]
struct DiscoveryQueueInner {
    queue: VecDeque<NodeId>,
    queued: HashSet<NodeId>,
}

impl DiscoveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a node ID unless it is already waiting.
    pub fn push(&self, node_id: NodeId) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.queued.insert(node_id) {
            inner.queue.push_back(node_id);
        }
    }

    pub fn pop(&self) -> Option<NodeId> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let node_id = inner.queue.pop_front()?;
        inner.queued.remove(&node_id);
        Some(node_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Node table observer that keeps the routing table current.
pub struct RouteComputer {
    own_id: NodeId,
    routes: RoutingTableHandle,
    discovery: DiscoveryQueue,
}

impl RouteComputer {
    pub fn new(own_id: NodeId, routes: RoutingTableHandle, discovery: DiscoveryQueue) -> Self {
        Self {
            own_id,
            routes,
            discovery,
        }
    }
}

impl NodeTableObserver for RouteComputer {
    fn on_event(&self, event: &NodeTableEvent, table: &NodeTable) {
        if !event.affects_topology() {
            return;
        }

        let computed = compute_routes(&self.own_id, table);
        for node_id in computed.unknown_nodes {
            self.discovery.push(node_id);
        }

        debug!(
            trigger = ?event.node_id(),
            routes = computed.table.len(),
            "recomputed routing table"
        );
        self.routes.publish(computed.table);
    }
}
