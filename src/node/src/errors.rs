//! Error types for the node daemon.

use overlay_core::errors::CoreError;
use overlay_core::types::NodeId;
use overlay_network::errors::NetworkError;
use std::error::Error as StdError;
use std::fmt;

/// Errors that can occur in the node daemon.
#[derive(Debug)]
pub enum NodeError {
    /// Error when a core operation fails.
    CoreError(CoreError),

    /// Error when a network operation fails.
    NetworkError(NetworkError),

    /// Error when a message failed authentication and is not allowed anonymously.
    Unauthenticated(NodeId),

    /// Error when a message is addressed to a node missing from the node table.
    UnknownDestination(NodeId),

    /// Error when a message is well-formed but makes no sense.
    InvalidMessage(String),

    /// Error when a configuration operation fails.
    ConfigError(String),
}

impl NodeError {
    /// Whether the error was caused by the content of an incoming message.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidMessage(_)
                | NodeError::NetworkError(NetworkError::SerializationError(_))
                | NodeError::NetworkError(NetworkError::UnsupportedVersion(_))
                | NodeError::CoreError(CoreError::InvalidSignature(_))
                | NodeError::CoreError(CoreError::NodeIdMismatch { .. })
                | NodeError::CoreError(CoreError::InvalidPublicKey(_))
                | NodeError::CoreError(CoreError::SerializationError(_))
        )
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::CoreError(e) => write!(f, "Core error: {}", e),
            NodeError::NetworkError(e) => write!(f, "Network error: {}", e),
            NodeError::Unauthenticated(node_id) => {
                write!(f, "Message from {} is not authenticated", node_id)
            }
            NodeError::UnknownDestination(node_id) => write!(f, "Unknown destination: {}", node_id),
            NodeError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
            NodeError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl StdError for NodeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            NodeError::CoreError(e) => Some(e),
            NodeError::NetworkError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CoreError> for NodeError {
    fn from(error: CoreError) -> Self {
        NodeError::CoreError(error)
    }
}

impl From<NetworkError> for NodeError {
    fn from(error: NetworkError) -> Self {
        NodeError::NetworkError(error)
    }
}
