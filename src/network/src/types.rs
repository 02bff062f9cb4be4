//! Wire types of the peer protocol.

use crate::errors::NetworkError;
use overlay_core::types::{NodeId, SubnetId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The only peer protocol version this node speaks.
pub const PROTOCOL_VERSION: u8 = 0;

/// Length of an X25519 public key.
pub const SESSION_PUBLIC_KEY_LENGTH: usize = 32;

/// The envelope every peer message travels in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    /// Protocol version, always [`PROTOCOL_VERSION`]
    pub version: u8,
    /// The node that sent the message
    pub sender: NodeId,
    /// Proof that `sender` produced `content`
    pub authentication: Authentication,
    /// Serialized [`PeerMessageContent`]
    pub content: Vec<u8>,
}

impl PeerMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetworkError> {
        Ok(bincode::serialize(self)?)
    }

    /// Parses an envelope and checks its version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        let message: PeerMessage = bincode::deserialize(bytes)?;

        if message.version != PROTOCOL_VERSION {
            return Err(NetworkError::UnsupportedVersion(message.version));
        }

        Ok(message)
    }
}

/// Authentication attached to a [`PeerMessage`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authentication {
    /// No authentication. Only accepted for a small set of message types.
    None,
    /// HMAC-SHA256 keyed with an X25519 shared secret between an ephemeral
    /// session key of the sender and the long-term key of the receiver.
    Ed25519X25519HmacSha256 {
        session_public_key: [u8; SESSION_PUBLIC_KEY_LENGTH],
        message_authentication_code: Vec<u8>,
    },
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authentication::None => write!(f, "None"),
            Authentication::Ed25519X25519HmacSha256 {
                session_public_key, ..
            } => write!(
                f,
                "Ed25519X25519HmacSha256 {{ session_public_key: {:02x?}.. }}",
                &session_public_key[..4]
            ),
        }
    }
}

/// Payload of a [`PeerMessage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessageContent {
    /// Asks the receiver to peer with the sender on a subnet.
    PeeringRequest {
        subnet_id: SubnetId,
        /// The sender's signed advertisement
        node_info: Vec<u8>,
    },
    /// A signed advertisement, relayed verbatim.
    LinkStateUpdate { signed_node_info: Vec<u8> },
    /// Asks for the receiver's cached advertisements of other nodes.
    LinkStateRequest { node_ids: Vec<NodeId> },
    /// A payment packet for the packet forwarder.
    InterledgerPacket { packet: Vec<u8> },
    /// A settlement between the two peers.
    Settlement {
        subnet_id: SubnetId,
        amount: u64,
        proof: Vec<u8>,
    },
    /// Opaque message for a subnet module.
    SubnetModuleMessage { subnet_id: SubnetId, message: Vec<u8> },
}

impl PeerMessageContent {
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetworkError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn message_type(&self) -> PeerMessageType {
        match self {
            PeerMessageContent::PeeringRequest { .. } => PeerMessageType::PeeringRequest,
            PeerMessageContent::LinkStateUpdate { .. } => PeerMessageType::LinkStateUpdate,
            PeerMessageContent::LinkStateRequest { .. } => PeerMessageType::LinkStateRequest,
            PeerMessageContent::InterledgerPacket { .. } => PeerMessageType::InterledgerPacket,
            PeerMessageContent::Settlement { .. } => PeerMessageType::Settlement,
            PeerMessageContent::SubnetModuleMessage { .. } => PeerMessageType::SubnetModuleMessage,
        }
    }
}

/// Discriminant of [`PeerMessageContent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerMessageType {
    PeeringRequest,
    LinkStateUpdate,
    LinkStateRequest,
    InterledgerPacket,
    Settlement,
    SubnetModuleMessage,
}

impl PeerMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerMessageType::PeeringRequest => "peeringRequest",
            PeerMessageType::LinkStateUpdate => "linkStateUpdate",
            PeerMessageType::LinkStateRequest => "linkStateRequest",
            PeerMessageType::InterledgerPacket => "interledgerPacket",
            PeerMessageType::Settlement => "settlement",
            PeerMessageType::SubnetModuleMessage => "subnetModuleMessage",
        }
    }
}

impl fmt::Display for PeerMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a single node ID in a link-state request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStateLookup {
    /// The signed advertisement the receiver holds for the node
    Found(Vec<u8>),
    NotFound(NodeId),
}

/// Response body of a peer message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessageResponse {
    Peering { accepted: bool },
    LinkState(Vec<LinkStateLookup>),
    Acknowledged,
}

impl PeerMessageResponse {
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetworkError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetworkError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(version: u8) -> PeerMessage {
        PeerMessage {
            version,
            sender: NodeId([3u8; 32]),
            authentication: Authentication::None,
            content: PeerMessageContent::LinkStateRequest {
                node_ids: vec![NodeId([4u8; 32])],
            }
            .to_bytes()
            .unwrap(),
        }
    }

    #[test]
    fn test_envelope_bytes() {
        let message = envelope(PROTOCOL_VERSION);
        let decoded = PeerMessage::from_bytes(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, message);

        let content = PeerMessageContent::from_bytes(&decoded.content).unwrap();
        assert_eq!(content.message_type(), PeerMessageType::LinkStateRequest);
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let bytes = envelope(1).to_bytes().unwrap();
        assert!(matches!(
            PeerMessage::from_bytes(&bytes),
            Err(NetworkError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn test_malformed_envelope_is_rejected() {
        let bytes = envelope(PROTOCOL_VERSION).to_bytes().unwrap();
        assert!(matches!(
            PeerMessage::from_bytes(&bytes[..bytes.len() / 2]),
            Err(NetworkError::SerializationError(_))
        ));
        assert!(PeerMessage::from_bytes(&[]).is_err());
    }
}
