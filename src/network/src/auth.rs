//! Message authentication for peer messages.

use crate::errors::NetworkError;
use crate::session::SessionKeyManager;
use crate::types::{Authentication, PeerMessage, PeerMessageType};
use hmac::{Hmac, Mac};
use overlay_core::node_table::NodeTableEntry;
use overlay_core::types::{NodeId, PublicKeyBytes, Timestamp};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Message types that may be sent and accepted without authentication.
///
/// A peering request is the first contact between two nodes, and link-state
/// requests are answered for nodes we are not peered with yet.
pub const ALLOW_ANONYMOUS_USAGE: &[PeerMessageType] =
    &[PeerMessageType::PeeringRequest, PeerMessageType::LinkStateRequest];

pub fn is_anonymous_allowed(message_type: PeerMessageType) -> bool {
    ALLOW_ANONYMOUS_USAGE.contains(&message_type)
}

fn message_hmac(content: &[u8], shared_secret: &[u8; 32]) -> Result<HmacSha256, NetworkError> {
    let mut mac = HmacSha256::new_from_slice(shared_secret)
        .map_err(|e| NetworkError::InvalidKey(e.to_string()))?;
    mac.update(content);
    Ok(mac)
}

/// Computes HMAC-SHA256 over the serialized message content.
pub fn calculate_message_hmac(content: &[u8], shared_secret: &[u8; 32]) -> Result<Vec<u8>, NetworkError> {
    Ok(message_hmac(content, shared_secret)?.finalize().into_bytes().to_vec())
}

/// Builds the authentication for an outgoing message.
pub fn generate_authentication(
    session_keys: &SessionKeyManager,
    content: &[u8],
    message_type: PeerMessageType,
    destination: &NodeId,
    destination_public_key: &PublicKeyBytes,
    now: Timestamp,
) -> Result<Authentication, NetworkError> {
    if is_anonymous_allowed(message_type) {
        return Ok(Authentication::None);
    }

    let key = session_keys.outgoing_key(destination, destination_public_key, now)?;

    Ok(Authentication::Ed25519X25519HmacSha256 {
        session_public_key: key.session_public_key,
        message_authentication_code: calculate_message_hmac(content, &key.shared_secret)?,
    })
}

/// Checks the authentication of an incoming message.
///
/// Only messages from nodes we are peered with can authenticate. Returns
/// `false` on any failure; a bad MAC is not an error.
pub fn authenticate_message(
    session_keys: &SessionKeyManager,
    message: &PeerMessage,
    sender: Option<&NodeTableEntry>,
    now: Timestamp,
) -> bool {
    let (session_public_key, message_authentication_code) = match &message.authentication {
        Authentication::None => return false,
        Authentication::Ed25519X25519HmacSha256 {
            session_public_key,
            message_authentication_code,
        } => (session_public_key, message_authentication_code),
    };

    let sender = match sender {
        Some(sender) if sender.peer_state.is_peered() => sender,
        _ => {
            debug!(sender = ?message.sender, "cannot authenticate message from node we are not peered with");
            return false;
        }
    };

    let key = match session_keys.incoming_key(session_public_key, now) {
        Ok(key) => key,
        Err(e) => {
            debug!(sender = ?sender.node_id, error = %e, "failed to derive incoming session key");
            return false;
        }
    };

    let valid = message_hmac(&message.content, &key.shared_secret)
        .map(|mac| mac.verify_slice(message_authentication_code).is_ok())
        .unwrap_or(false);

    if valid {
        session_keys.confirm_incoming(*session_public_key, &key);
    }

    valid
}
