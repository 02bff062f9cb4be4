//! Configuration for the node daemon.

use crate::errors::NodeError;
use anyhow::Result;
use overlay_core::crypto::NodeKeypair;
use overlay_core::link_state::LinkStatePolicy;
use overlay_core::node_table::NodeTableEntry;
use overlay_core::types::{NodeId, SubnetId};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Configuration for the node daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Public URL other nodes reach this node at
    pub url: String,
    /// Display name included in our advertisement
    pub alias: String,
    /// Listen address for the peer message endpoint
    pub listen_addr: String,
    /// Subnets this node supports
    pub subnets: Vec<String>,
    /// Nodes known at startup
    pub bootstrap_nodes: Vec<BootstrapNode>,
    /// Peering is attempted while we have fewer peers than this
    pub min_peers: usize,
    /// Protocol timings and thresholds
    pub protocol: ProtocolConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// A node known at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapNode {
    /// Hex encoded node ID
    pub id: String,
    pub url: String,
    /// Hex encoded Ed25519 public key
    pub public_key: String,
}

impl BootstrapNode {
    /// Parses the entry into a node table entry, checking that the ID belongs
    /// to the public key.
    pub fn to_entry(&self) -> Result<NodeTableEntry, NodeError> {
        let public_key: [u8; 32] = hex::decode(&self.public_key)
            .map_err(|e| NodeError::ConfigError(format!("bootstrap public key {}: {}", self.public_key, e)))?
            .try_into()
            .map_err(|_| NodeError::ConfigError(format!("bootstrap public key {} must be 32 bytes", self.public_key)))?;

        let node_id: NodeId = self
            .id
            .parse()
            .map_err(|e| NodeError::ConfigError(format!("bootstrap node id: {}", e)))?;

        if NodeId::from_public_key(&public_key) != node_id {
            return Err(NodeError::ConfigError(format!(
                "bootstrap node id {} does not match its public key",
                self.id
            )));
        }

        Ok(NodeTableEntry::new(node_id, public_key, self.url.clone(), String::new()))
    }
}

/// Protocol timings and thresholds. All durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Updates received this many times are no longer relayed
    pub counter_threshold: u32,
    /// Upper bound of the random delay before relaying an update
    pub max_retransmit_delay: u64,
    /// How often due retransmissions are sent
    pub retransmit_check_interval: u64,
    /// Our own advertisement is re-issued when older than this
    pub max_link_state_update_interval: u64,
    /// Link states older than this are refreshed
    pub node_stale_timeout: u64,
    /// How often one stale node is refreshed
    pub node_refresh_interval: u64,
    /// Chance of asking a third node even when we know the subject's URL
    pub indirect_query_probability: f64,
    /// Bounds of the jittered heartbeat interval
    pub min_heartbeat_interval: u64,
    pub max_heartbeat_interval: u64,
    /// How often the peer count is checked
    pub peering_check_interval: u64,
    /// Lifetime of cached session keys
    pub session_key_lifetime: u64,
    /// Bound on a single request to another node
    pub communication_timeout: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            counter_threshold: 3,
            max_retransmit_delay: 500,
            retransmit_check_interval: 200,
            max_link_state_update_interval: 48 * 3_600_000,
            node_stale_timeout: 3 * 3_600_000,
            node_refresh_interval: 1_000,
            indirect_query_probability: 0.2,
            min_heartbeat_interval: 5_000,
            max_heartbeat_interval: 20_000,
            peering_check_interval: 1_000,
            session_key_lifetime: 3_600_000,
            communication_timeout: 30_000,
        }
    }
}

impl ProtocolConfig {
    pub fn link_state_policy(&self) -> LinkStatePolicy {
        LinkStatePolicy {
            counter_threshold: self.counter_threshold,
            max_retransmit_delay: self.max_retransmit_delay,
            max_update_interval: self.max_link_state_update_interval,
        }
    }

    pub fn communication_timeout(&self) -> Duration {
        Duration::from_millis(self.communication_timeout)
    }

    /// Checks values that would stall or break the periodic tasks.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.retransmit_check_interval == 0 || self.node_refresh_interval == 0 || self.peering_check_interval == 0 {
            return Err(NodeError::ConfigError("task intervals must be positive".to_string()));
        }
        // Updates are stored with counter 1, so a zero threshold relays nothing.
        if self.counter_threshold == 0 {
            return Err(NodeError::ConfigError("counter_threshold must be positive".to_string()));
        }
        if self.min_heartbeat_interval > self.max_heartbeat_interval {
            return Err(NodeError::ConfigError(
                "min_heartbeat_interval must not exceed max_heartbeat_interval".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.indirect_query_probability) {
            return Err(NodeError::ConfigError(
                "indirect_query_probability must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to enable the metrics server
    pub enabled: bool,
    /// Listen address for the metrics server
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:7000".to_string(),
            alias: String::new(),
            listen_addr: "0.0.0.0:7000".to_string(),
            subnets: Vec::new(),
            bootstrap_nodes: Vec::new(),
            min_peers: 2,
            protocol: ProtocolConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Loads configuration from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn subnet_ids(&self) -> Vec<SubnetId> {
        self.subnets.iter().map(SubnetId::new).collect()
    }
}

/// Loads the node key seed from `path`, generating and saving a new one if the
/// file does not exist yet. The file holds the hex encoded 32-byte seed.
pub fn load_or_generate_keypair<P: AsRef<Path>>(path: P) -> Result<NodeKeypair> {
    let path = path.as_ref();

    if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        let seed: [u8; 32] = hex::decode(contents.trim())?
            .try_into()
            .map_err(|_| anyhow::anyhow!("node key in {} must be 32 bytes", path.display()))?;
        return Ok(NodeKeypair::from_seed(&seed));
    }

    let keypair = NodeKeypair::generate();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, hex::encode(keypair.seed()))?;
    info!("Generated new node key at {}", path.display());

    Ok(keypair)
}
