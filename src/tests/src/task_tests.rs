//! Background tasks, stalled peers and node start-up from disk.

use crate::{bootstrap_node, test_config, LocalNetwork};
use async_trait::async_trait;
use overlay_core::crypto::NodeKeypair;
use overlay_core::node_table::{NodeTableEntry, NodeUpdate, PeerState};
use overlay_core::types::{now_millis, SubnetId};
use overlay_network::errors::NetworkError;
use overlay_network::transport::Transport;
use overlay_node::config::{load_or_generate_keypair, NodeConfig};
use overlay_node::Node;
use rand::Rng;
use serial_test::serial;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio::runtime::Runtime;
use tokio::sync::watch;

/// Accepts every request and never answers.
struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn send(&self, _url: &str, _envelope: Vec<u8>) -> Result<Vec<u8>, NetworkError> {
        std::future::pending().await
    }
}

#[test]
#[serial]
fn test_stalled_peering_requests_are_resent_concurrently() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut config = test_config("a", &["stub"], &[]);
        config.protocol.communication_timeout = 200;
        let node = Node::new(config, NodeKeypair::generate(), Arc::new(StalledTransport)).unwrap();

        let requested = rand::thread_rng().gen_range(3..=6);
        {
            let mut table = node.node_table();
            for i in 0..requested {
                let keypair = NodeKeypair::generate();
                table.add_node(NodeTableEntry::new(
                    keypair.node_id(),
                    keypair.public_key(),
                    format!("local://stalled-{}", i),
                    String::new(),
                ));
                table
                    .update_node(
                        &keypair.node_id(),
                        NodeUpdate::peer_state(PeerState::RequestPeering {
                            last_seen: now_millis(),
                            subnet_id: SubnetId::new("stub"),
                        }),
                    )
                    .unwrap();
            }
        }

        let started = Instant::now();
        node.send_heartbeats().await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(600), "heartbeat took {:?}", elapsed);

        let still_requested = node
            .node_table()
            .iter()
            .filter(|entry| matches!(entry.peer_state, PeerState::RequestPeering { .. }))
            .count();
        assert_eq!(still_requested, requested);
    });
}

#[test]
#[serial]
fn test_tasks_stop_on_shutdown() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let network = LocalNetwork::new();
        let b_key = NodeKeypair::generate();
        let _b = network.spawn_node(test_config("b", &["stub"], &[]), b_key.clone());
        let a = network.spawn_node(test_config("a", &["stub"], &[(&b_key, "b")]), NodeKeypair::generate());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = a.spawn_tasks(shutdown_rx);
        assert_eq!(handles.len(), 4);

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("task did not stop")
                .unwrap();
        }
    });
}

#[test]
fn test_node_from_config_and_key_files() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    let key_path = dir.path().join("keys").join("node.key");

    let boot = NodeKeypair::generate();
    let mut config = test_config("a", &["stub", "other"], &[]);
    config.bootstrap_nodes = vec![bootstrap_node(&boot, "b")];
    config.to_file(&config_path).unwrap();

    let keypair = load_or_generate_keypair(&key_path).unwrap();
    let reloaded = load_or_generate_keypair(&key_path).unwrap();
    assert_eq!(keypair.node_id(), reloaded.node_id());

    let config = NodeConfig::from_file(&config_path).unwrap();
    let node = LocalNetwork::new().spawn_node(config, reloaded);

    assert_eq!(node.node_id(), keypair.node_id());
    assert!(node.node_table().contains(&boot.node_id()));
    assert_eq!(node.config().subnet_ids().len(), 2);
}
