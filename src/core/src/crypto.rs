//! Node identity keys, advertisement signing and key conversion.
//!
//! Every node owns a long-term Ed25519 key. It signs the node's link-state
//! advertisements and, converted to its X25519 form, anchors the session keys
//! that authenticate peer messages.

use crate::errors::CoreError;
use crate::types::{NodeId, NodeInfo, PublicKeyBytes, Signature, SignedNodeInfo};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha512};
use std::fmt;

/// The long-term Ed25519 key pair of this node.
#[derive(Clone)]
pub struct NodeKeypair {
    signing_key: SigningKey,
}

impl NodeKeypair {
    /// Generates a fresh random key pair.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Restores a key pair from its 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Returns the 32-byte seed this key pair was created from.
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Returns the raw public key bytes.
    pub fn public_key(&self) -> PublicKeyBytes {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Returns the node ID derived from the public key.
    pub fn node_id(&self) -> NodeId {
        NodeId::from_public_key(&self.public_key())
    }

    /// Signs arbitrary bytes.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Returns the X25519 scalar corresponding to this Ed25519 key.
    ///
    /// This is the first half of the SHA-512 expansion of the seed, which is
    /// exactly the (unclamped) scalar Ed25519 uses; X25519 clamps it again.
    pub fn x25519_secret(&self) -> [u8; 32] {
        let expanded = Sha512::digest(self.signing_key.to_bytes());
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&expanded[..32]);
        secret
    }
}

impl fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKeypair {{ node_id: {:?} }}", self.node_id())
    }
}

/// Converts an Ed25519 public key to its X25519 (Montgomery) form.
pub fn x25519_public_from_ed25519(public_key: &PublicKeyBytes) -> Result<[u8; 32], CoreError> {
    let point = CompressedEdwardsY(*public_key)
        .decompress()
        .ok_or_else(|| CoreError::InvalidPublicKey("not a valid Edwards point".to_string()))?;

    Ok(point.to_montgomery().to_bytes())
}

/// Serializes and signs a node advertisement, returning the wire bytes of the
/// resulting [`SignedNodeInfo`].
pub fn sign_node_info(keypair: &NodeKeypair, info: &NodeInfo) -> Result<Vec<u8>, CoreError> {
    let signed = info.to_bytes()?;
    let signature = keypair.sign(&signed);

    SignedNodeInfo { signed, signature }.to_bytes()
}

/// Parses a signed node advertisement and checks it.
///
/// The signature must verify against the advertised public key, and the
/// advertised node ID must be the one derived from that key.
pub fn verify_signed_node_info(bytes: &[u8]) -> Result<NodeInfo, CoreError> {
    let signed_info = SignedNodeInfo::from_bytes(bytes)?;
    let info = signed_info.node_info()?;

    let expected = NodeId::from_public_key(&info.node_public_key);
    if expected != info.node_id {
        return Err(CoreError::NodeIdMismatch {
            expected,
            actual: info.node_id,
        });
    }

    let public_key = VerifyingKey::from_bytes(&info.node_public_key)
        .map_err(|e| CoreError::InvalidPublicKey(e.to_string()))?;
    let signature = ed25519_dalek::Signature::from_bytes(&signed_info.signature.0);

    public_key
        .verify(&signed_info.signed, &signature)
        .map_err(|e| CoreError::InvalidSignature(e.to_string()))?;

    Ok(info)
}
