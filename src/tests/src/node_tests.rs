//! Multi-node scenarios over the in-process network.

use crate::{test_config, LocalNetwork};
use overlay_core::crypto::NodeKeypair;
use overlay_core::node_table::PeerState;
use overlay_core::types::SubnetId;
use overlay_node::metrics::LINK_STATE_RETRANSMISSIONS;
use overlay_node::Node;
use serial_test::serial;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// A and C both bootstrap to B. Nobody is peered yet.
fn line_of_three() -> (LocalNetwork, Arc<Node>, Arc<Node>, Arc<Node>) {
    let network = LocalNetwork::new();
    let (a_key, b_key, c_key) = (NodeKeypair::generate(), NodeKeypair::generate(), NodeKeypair::generate());

    let b = network.spawn_node(test_config("b", &["stub"], &[]), b_key.clone());
    let a = network.spawn_node(test_config("a", &["stub"], &[(&b_key, "b")]), a_key);
    let c = network.spawn_node(test_config("c", &["stub"], &[(&b_key, "b")]), c_key);

    (network, a, b, c)
}

fn stub() -> SubnetId {
    SubnetId::new("stub")
}

#[test]
#[serial]
fn test_peering_and_flooding_build_routes() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (_network, a, b, c) = line_of_three();

        assert!(a.request_peering(&b.node_id(), stub()).await.unwrap());
        assert!(c.request_peering(&b.node_id(), stub()).await.unwrap());

        assert_eq!(a.peers(), BTreeSet::from([b.node_id()]));
        assert_eq!(b.peers(), BTreeSet::from([a.node_id(), c.node_id()]));

        let relayed_before = LINK_STATE_RETRANSMISSIONS.get();
        a.forward_link_state_updates().await.unwrap();
        c.forward_link_state_updates().await.unwrap();
        b.forward_link_state_updates().await.unwrap();
        assert!(LINK_STATE_RETRANSMISSIONS.get() > relayed_before);

        // B told A about C before A knew C, so A has to look it up.
        assert!(a.node_table().get(&c.node_id()).is_none());
        assert_eq!(a.discovery_queue().len(), 1);
        a.discover_nodes().await.unwrap();
        c.discover_nodes().await.unwrap();

        let routes = a.routing_table();
        let to_b = routes.get(&b.node_id()).unwrap();
        assert_eq!(to_b.distance, 1);
        assert_eq!(to_b.first_hop_options, BTreeSet::from([b.node_id()]));

        let to_c = routes.get(&c.node_id()).unwrap();
        assert_eq!(to_c.distance, 2);
        assert_eq!(to_c.first_hop_options, BTreeSet::from([b.node_id()]));
        assert!(routes.get(&a.node_id()).is_none());

        let to_a = c.routing_table().get(&a.node_id()).cloned().unwrap();
        assert_eq!(to_a.distance, 2);
        assert_eq!(to_a.first_hop_options, BTreeSet::from([b.node_id()]));
    });
}

#[test]
#[serial]
fn test_update_is_relayed_once() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (_network, a, b, _c) = line_of_three();
        assert!(a.request_peering(&b.node_id(), stub()).await.unwrap());

        a.forward_link_state_updates().await.unwrap();
        assert!(b.forward_link_state_updates().await.unwrap() > 0);
        assert_eq!(b.forward_link_state_updates().await.unwrap(), 0);

        // The heartbeat repeats an update B already holds.
        a.send_heartbeats().await.unwrap();
        assert_eq!(b.forward_link_state_updates().await.unwrap(), 0);

        let sequence = a
            .node_table()
            .get(&a.node_id())
            .and_then(|entry| entry.link_state.as_ref())
            .map(|link_state| link_state.sequence);
        let stored = b
            .node_table()
            .get(&a.node_id())
            .and_then(|entry| entry.link_state.as_ref())
            .map(|link_state| (link_state.sequence, link_state.update_received_counter));
        assert_eq!(stored, Some((sequence.unwrap(), 2)));
    });
}

#[test]
#[serial]
fn test_peering_rejected_for_unsupported_subnet() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (_network, a, b, _c) = line_of_three();

        assert!(!a.request_peering(&b.node_id(), SubnetId::new("other")).await.unwrap());

        let state = a.node_table().get(&b.node_id()).map(|entry| entry.peer_state.clone());
        assert!(matches!(state, Some(PeerState::RequestPeering { .. })));
        assert!(a.peers().is_empty());
        assert!(b.node_table().get(&a.node_id()).is_none());
    });
}

#[test]
#[serial]
fn test_refresh_then_peer_automatically() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (_network, a, b, _c) = line_of_three();

        // Bootstrap entries come without a link state, so B is no candidate yet.
        assert!(a.peering_candidate().is_none());

        a.refresh_node_state().await.unwrap();
        let has_link_state = a
            .node_table()
            .get(&b.node_id())
            .map(|entry| entry.link_state.is_some())
            .unwrap();
        assert!(has_link_state);

        assert_eq!(a.peering_candidate(), Some((b.node_id(), stub())));
        a.add_peers_if_necessary().await.unwrap();

        assert_eq!(a.peers(), BTreeSet::from([b.node_id()]));
        assert!(b.peers().contains(&a.node_id()));
    });
}

#[test]
#[serial]
fn test_link_state_query() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (_network, a, b, c) = line_of_three();

        let own = a.query_link_state(&b.node_id(), &b.node_id()).await.unwrap();
        assert_eq!(own, b.own_link_state_update());

        // B has not heard of C's advertisement yet.
        let unknown = a.query_link_state(&b.node_id(), &c.node_id()).await.unwrap();
        assert!(unknown.is_none());
    });
}

#[test]
#[serial]
fn test_send_to_unknown_node_fails() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (_network, a, _b, c) = line_of_three();

        let result = a.request_peering(&c.node_id(), stub()).await;
        assert!(result.is_err());
    });
}
