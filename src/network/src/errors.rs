/// Error types for the network crate.
use overlay_core::errors::CoreError;
use std::error::Error as StdError;
use std::fmt;

/// Errors that can occur in the network crate.
#[derive(Debug)]
pub enum NetworkError {
    /// Error when serialization or deserialization fails.
    SerializationError(String),

    /// Error when an envelope carries a protocol version we do not speak.
    UnsupportedVersion(u8),

    /// Error when key material cannot be used for key agreement.
    InvalidKey(String),

    /// Error when the transport fails to deliver a request.
    TransportError(String),

    /// Error when a timeout occurs.
    Timeout(String),

    /// Error when the remote node answers with an error status.
    Rejected(u16),

    /// Error bubbled up from the core crate.
    Core(CoreError),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            NetworkError::UnsupportedVersion(version) => {
                write!(f, "Unsupported peer protocol version: {}", version)
            }
            NetworkError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            NetworkError::TransportError(msg) => write!(f, "Transport error: {}", msg),
            NetworkError::Timeout(msg) => write!(f, "Timeout waiting for {}", msg),
            NetworkError::Rejected(status) => write!(f, "Request rejected with status {}", status),
            NetworkError::Core(err) => write!(f, "Core error: {}", err),
        }
    }
}

impl StdError for NetworkError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            NetworkError::Core(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CoreError> for NetworkError {
    fn from(err: CoreError) -> Self {
        NetworkError::Core(err)
    }
}

impl From<bincode::Error> for NetworkError {
    fn from(err: bincode::Error) -> Self {
        NetworkError::SerializationError(err.to_string())
    }
}
