//! Integration tests for the overlay routing node.
//!
//! Nodes in these tests talk through [`LocalNetwork`], which hands envelopes
//! straight to the addressed node instead of going over HTTP.

use async_trait::async_trait;
use overlay_core::crypto::NodeKeypair;
use overlay_network::errors::NetworkError;
use overlay_network::transport::Transport;
use overlay_node::config::{BootstrapNode, NodeConfig};
use overlay_node::errors::NodeError;
use overlay_node::Node;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

#[cfg(test)]
mod network_tests;
#[cfg(test)]
mod node_tests;
#[cfg(test)]
mod task_tests;

/// In-process transport that delivers envelopes by URL.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    nodes: Arc<Mutex<HashMap<String, Weak<Node>>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a node on this network and makes it reachable at its URL.
    pub fn spawn_node(&self, config: NodeConfig, keypair: NodeKeypair) -> Arc<Node> {
        let url = config.url.clone();
        let node = Arc::new(Node::new(config, keypair, Arc::new(self.clone())).unwrap());
        self.nodes.lock().unwrap().insert(url, Arc::downgrade(&node));
        node
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn send(&self, url: &str, envelope: Vec<u8>) -> Result<Vec<u8>, NetworkError> {
        let node = self
            .nodes
            .lock()
            .unwrap()
            .get(url)
            .and_then(Weak::upgrade)
            .ok_or_else(|| NetworkError::TransportError(format!("nothing listening at {}", url)))?;

        node.handle_peer_message(&envelope).map_err(|e| match e {
            NodeError::Unauthenticated(_) => NetworkError::Rejected(401),
            e if e.is_bad_request() => NetworkError::Rejected(400),
            _ => NetworkError::Rejected(500),
        })
    }
}

/// Configuration for a test node reachable at `local://{name}`.
pub fn test_config(name: &str, subnets: &[&str], bootstrap: &[(&NodeKeypair, &str)]) -> NodeConfig {
    let mut config = NodeConfig {
        url: format!("local://{}", name),
        alias: name.to_string(),
        subnets: subnets.iter().map(|s| s.to_string()).collect(),
        bootstrap_nodes: bootstrap
            .iter()
            .map(|(keypair, name)| bootstrap_node(keypair, name))
            .collect(),
        ..NodeConfig::default()
    };

    // Relay without delay so flooding can be stepped by hand.
    config.protocol.max_retransmit_delay = 0;
    config
}

pub fn bootstrap_node(keypair: &NodeKeypair, name: &str) -> BootstrapNode {
    BootstrapNode {
        id: keypair.node_id().to_string(),
        url: format!("local://{}", name),
        public_key: hex::encode(keypair.public_key()),
    }
}
