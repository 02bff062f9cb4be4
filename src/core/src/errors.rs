//! Error types for the core crate.

use crate::types::NodeId;
use thiserror::Error;

/// Errors that can occur in the core crate.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A node table mutation referenced a node that was never added.
    ///
    /// Callers check for existence first, so this signals a logic error.
    #[error("Node not found in node table: {0}")]
    NodeNotFound(NodeId),

    /// Error when a signature verification fails.
    #[error("Signature verification failed: {0}")]
    InvalidSignature(String),

    /// Error when an advertised node ID does not belong to the advertised key.
    #[error("Node ID mismatch: expected {expected}, got {actual}")]
    NodeIdMismatch {
        /// The ID derived from the public key
        expected: NodeId,
        /// The ID claimed by the advertisement
        actual: NodeId,
    },

    /// Error when key material cannot be decoded.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Error when serialization or deserialization fails.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
