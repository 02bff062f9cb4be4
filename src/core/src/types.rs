//! Core types for the overlay network.

use crate::errors::CoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Raw Ed25519 public key bytes.
pub type PublicKeyBytes = [u8; 32];

/// Link-state sequence number, monotonically increasing per originator.
pub type Sequence = u64;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Returns the current wall clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Identifier of a node, the SHA-256 hash of its Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Derives the node ID belonging to a public key.
    pub fn from_public_key(public_key: &PublicKeyBytes) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(public_key);
        let result = hasher.finalize();

        let mut id = [0u8; 32];
        id.copy_from_slice(&result);
        NodeId(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// Full IDs are unreadable in logs, so Debug only shows the first bytes.
impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..6]))
    }
}

impl FromStr for NodeId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| CoreError::SerializationError(format!("invalid node id {}: {}", s, e)))?;

        let id: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::SerializationError(format!("invalid node id length: {}", s))
        })?;

        Ok(NodeId(id))
    }
}

/// Identifier of a subnet (settlement scheme) a node participates in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubnetId(pub String);

impl SubnetId {
    pub fn new(id: impl Into<String>) -> Self {
        SubnetId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signature, represented as a 64-byte array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

// Implement serialization for Signature
impl serde::Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

// Implement deserialization for Signature
impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SignatureVisitor;

        impl<'de> serde::de::Visitor<'de> for SignatureVisitor {
            type Value = Signature;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a 64-byte signature")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v.len() != 64 {
                    return Err(E::custom(format!(
                        "invalid signature length: {} (expected 64)",
                        v.len()
                    )));
                }

                let mut signature = [0u8; 64];
                signature.copy_from_slice(v);
                Ok(Signature(signature))
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_bytes(&v)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut signature = [0u8; 64];
                for (i, byte) in signature.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(Signature(signature))
            }
        }

        deserializer.deserialize_bytes(SignatureVisitor)
    }
}

/// One item in the entry list of a node advertisement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeInfoEntry {
    /// The originator claims adjacency to this node.
    Neighbor { node_id: NodeId },
    /// The originator supports this subnet.
    Subnet { subnet_id: SubnetId },
}

/// The signed portion of a node advertisement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The originating node
    pub node_id: NodeId,
    /// Sequence number of this advertisement
    pub sequence: Sequence,
    /// Publicly reachable URL of the node
    pub url: String,
    /// Human-readable alias, not verified
    pub alias: String,
    /// The node's Ed25519 public key
    pub node_public_key: PublicKeyBytes,
    /// Neighbor and subnet entries
    pub entries: Vec<NodeInfoEntry>,
}

impl NodeInfo {
    /// Returns the advertised neighbors.
    pub fn neighbors(&self) -> impl Iterator<Item = &NodeId> {
        self.entries.iter().filter_map(|entry| match entry {
            NodeInfoEntry::Neighbor { node_id } => Some(node_id),
            _ => None,
        })
    }

    /// Returns the advertised subnets.
    pub fn subnets(&self) -> impl Iterator<Item = &SubnetId> {
        self.entries.iter().filter_map(|entry| match entry {
            NodeInfoEntry::Subnet { subnet_id } => Some(subnet_id),
            _ => None,
        })
    }

    /// Serializes the signed portion.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        bincode::serialize(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeInfo {{ node_id: {:?}, sequence: {}, url: {}, alias: {}, entries: {} }}",
            self.node_id,
            self.sequence,
            self.url,
            self.alias,
            self.entries.len()
        )
    }
}

/// A node advertisement as it travels on the wire.
///
/// `signed` holds the serialized [`NodeInfo`] exactly as it was signed, so
/// relaying nodes never re-serialize it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedNodeInfo {
    pub signed: Vec<u8>,
    pub signature: Signature,
}

impl SignedNodeInfo {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        bincode::serialize(self).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        bincode::deserialize(bytes).map_err(|e| CoreError::SerializationError(e.to_string()))
    }

    /// Decodes the signed portion without checking the signature.
    pub fn node_info(&self) -> Result<NodeInfo, CoreError> {
        bincode::deserialize(&self.signed)
            .map_err(|e| CoreError::SerializationError(e.to_string()))
    }
}
