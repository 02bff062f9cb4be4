//! Network layer for the overlay routing node.
//!
//! This crate provides the peer message envelope and its content codec, the
//! session key caches, message authentication and the transport used to
//! exchange envelopes with other nodes.

pub mod auth;
pub mod errors;
pub mod session;
pub mod transport;
pub mod types;

// Re-export commonly used types and functions
pub use auth::{authenticate_message, generate_authentication, is_anonymous_allowed, ALLOW_ANONYMOUS_USAGE};
pub use errors::NetworkError;
pub use session::SessionKeyManager;
pub use transport::{HttpTransport, Transport};
pub use types::{
    Authentication, LinkStateLookup, PeerMessage, PeerMessageContent, PeerMessageResponse, PeerMessageType,
    PROTOCOL_VERSION,
};
