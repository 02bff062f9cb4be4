//! Envelope handling of a single node, driven with hand-built messages.

use crate::{test_config, LocalNetwork};
use overlay_core::crypto::{sign_node_info, NodeKeypair};
use overlay_core::types::{now_millis, NodeId, NodeInfo, NodeInfoEntry, SubnetId};
use overlay_network::auth::generate_authentication;
use overlay_network::session::{SessionKeyManager, DEFAULT_SESSION_KEY_LIFETIME};
use overlay_network::types::{
    Authentication, PeerMessage, PeerMessageContent, PeerMessageResponse, PROTOCOL_VERSION,
};
use overlay_node::errors::NodeError;
use overlay_node::{Node, PacketSink};
use std::sync::{Arc, Mutex};

/// A remote node that builds its own envelopes.
struct Remote {
    keypair: NodeKeypair,
    session_keys: SessionKeyManager,
}

impl Remote {
    fn new() -> Self {
        let keypair = NodeKeypair::generate();
        let session_keys = SessionKeyManager::new(keypair.x25519_secret(), DEFAULT_SESSION_KEY_LIFETIME);
        Self { keypair, session_keys }
    }

    fn node_id(&self) -> NodeId {
        self.keypair.node_id()
    }

    fn advertisement(&self, sequence: u64, subnets: &[&str]) -> Vec<u8> {
        let info = NodeInfo {
            node_id: self.node_id(),
            sequence,
            url: "local://remote".to_string(),
            alias: "remote".to_string(),
            node_public_key: self.keypair.public_key(),
            entries: subnets
                .iter()
                .map(|subnet| NodeInfoEntry::Subnet {
                    subnet_id: SubnetId::new(*subnet),
                })
                .collect(),
        };
        sign_node_info(&self.keypair, &info).unwrap()
    }

    fn anonymous(&self, content: PeerMessageContent) -> Vec<u8> {
        PeerMessage {
            version: PROTOCOL_VERSION,
            sender: self.node_id(),
            authentication: Authentication::None,
            content: content.to_bytes().unwrap(),
        }
        .to_bytes()
        .unwrap()
    }

    fn authenticated(&self, to: &NodeKeypair, content: PeerMessageContent) -> PeerMessage {
        let message_type = content.message_type();
        let content = content.to_bytes().unwrap();
        let authentication = generate_authentication(
            &self.session_keys,
            &content,
            message_type,
            &to.node_id(),
            &to.public_key(),
            now_millis(),
        )
        .unwrap();

        PeerMessage {
            version: PROTOCOL_VERSION,
            sender: self.node_id(),
            authentication,
            content,
        }
    }

    /// Peers with `node` through an anonymous peering request.
    fn peer_with(&self, node: &Node) {
        let request = self.anonymous(PeerMessageContent::PeeringRequest {
            subnet_id: SubnetId::new("stub"),
            node_info: self.advertisement(now_millis(), &["stub"]),
        });
        let response = node.handle_peer_message(&request).unwrap();
        assert_eq!(
            PeerMessageResponse::from_bytes(&response).unwrap(),
            PeerMessageResponse::Peering { accepted: true }
        );
    }
}

#[derive(Default)]
struct RecordingSink {
    packets: Mutex<Vec<(NodeId, Vec<u8>)>>,
}

impl PacketSink for RecordingSink {
    fn handle_packet(&self, from: &NodeId, packet: Vec<u8>) {
        self.packets.lock().unwrap().push((*from, packet));
    }
}

fn local_node() -> (NodeKeypair, Arc<Node>) {
    let keypair = NodeKeypair::generate();
    let node = LocalNetwork::new().spawn_node(test_config("local", &["stub"], &[]), keypair.clone());
    (keypair, node)
}

#[test]
fn test_anonymous_peering_request_is_accepted() {
    let (_, node) = local_node();
    let remote = Remote::new();

    remote.peer_with(&node);

    assert!(node.peers().contains(&remote.node_id()));
    let own = node.own_link_state_update().unwrap();
    let info = overlay_core::crypto::verify_signed_node_info(&own).unwrap();
    assert!(info.neighbors().any(|neighbor| *neighbor == remote.node_id()));
}

#[test]
fn test_peering_request_with_foreign_advertisement() {
    let (_, node) = local_node();
    let remote = Remote::new();
    let impostor = Remote::new();

    let request = impostor.anonymous(PeerMessageContent::PeeringRequest {
        subnet_id: SubnetId::new("stub"),
        node_info: remote.advertisement(now_millis(), &["stub"]),
    });

    let result = node.handle_peer_message(&request);
    assert!(matches!(result, Err(NodeError::InvalidMessage(_))));
    assert!(node.peers().is_empty());
}

#[test]
fn test_anonymous_link_state_update_is_rejected() {
    let (_, node) = local_node();
    let remote = Remote::new();
    remote.peer_with(&node);

    let update = remote.anonymous(PeerMessageContent::LinkStateUpdate {
        signed_node_info: remote.advertisement(now_millis() + 1_000, &["stub"]),
    });

    let result = node.handle_peer_message(&update);
    assert!(matches!(result, Err(NodeError::Unauthenticated(id)) if id == remote.node_id()));
}

#[test]
fn test_authenticated_link_state_update() {
    let (keypair, node) = local_node();
    let remote = Remote::new();
    remote.peer_with(&node);

    let sequence = now_millis() + 1_000;
    let update = remote.authenticated(
        &keypair,
        PeerMessageContent::LinkStateUpdate {
            signed_node_info: remote.advertisement(sequence, &["stub", "other"]),
        },
    );

    let response = node.handle_peer_message(&update.to_bytes().unwrap()).unwrap();
    assert_eq!(
        PeerMessageResponse::from_bytes(&response).unwrap(),
        PeerMessageResponse::Acknowledged
    );

    let table = node.node_table();
    let link_state = table.get(&remote.node_id()).unwrap().link_state.as_ref().unwrap();
    assert_eq!(link_state.sequence, sequence);
    assert_eq!(link_state.subnets.len(), 2);
}

#[test]
fn test_tampered_content_is_rejected() {
    let (keypair, node) = local_node();
    let remote = Remote::new();
    remote.peer_with(&node);

    let mut update = remote.authenticated(
        &keypair,
        PeerMessageContent::LinkStateUpdate {
            signed_node_info: remote.advertisement(now_millis() + 1_000, &["stub"]),
        },
    );
    let last = update.content.len() - 1;
    update.content[last] ^= 0x01;

    let result = node.handle_peer_message(&update.to_bytes().unwrap());
    assert!(result.is_err());
}

#[test]
fn test_authenticated_message_from_unpeered_sender() {
    let (keypair, node) = local_node();
    let remote = Remote::new();

    let update = remote.authenticated(
        &keypair,
        PeerMessageContent::LinkStateUpdate {
            signed_node_info: remote.advertisement(now_millis(), &["stub"]),
        },
    );

    let result = node.handle_peer_message(&update.to_bytes().unwrap());
    assert!(matches!(result, Err(NodeError::Unauthenticated(_))));
}

#[test]
fn test_packets_reach_the_packet_sink() {
    let keypair = NodeKeypair::generate();
    let sink = Arc::new(RecordingSink::default());
    let node = Node::new(
        test_config("local", &["stub"], &[]),
        keypair.clone(),
        Arc::new(LocalNetwork::new()),
    )
    .unwrap()
    .with_packet_sink(sink.clone());

    let remote = Remote::new();
    remote.peer_with(&node);

    let packet = remote.authenticated(
        &keypair,
        PeerMessageContent::InterledgerPacket {
            packet: vec![0x0c, 0x01, 0x02],
        },
    );
    let response = node.handle_peer_message(&packet.to_bytes().unwrap()).unwrap();
    assert_eq!(
        PeerMessageResponse::from_bytes(&response).unwrap(),
        PeerMessageResponse::Acknowledged
    );

    let packets = sink.packets.lock().unwrap();
    assert_eq!(packets.as_slice(), &[(remote.node_id(), vec![0x0c, 0x01, 0x02])]);
}

#[test]
fn test_unsupported_version_is_bad_request() {
    let (_, node) = local_node();
    let remote = Remote::new();

    let mut message = PeerMessage::from_bytes(&remote.anonymous(PeerMessageContent::LinkStateRequest {
        node_ids: vec![node.node_id()],
    }))
    .unwrap();
    message.version = 1;
    let bytes = message.to_bytes().unwrap();

    let error = node.handle_peer_message(&bytes).unwrap_err();
    assert!(error.is_bad_request());
}
