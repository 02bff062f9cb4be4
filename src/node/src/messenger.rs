//! Outgoing peer messages.

use crate::errors::NodeError;
use crate::metrics::SEND_FAILURES;
use crate::Node;
use overlay_core::types::{now_millis, NodeId};
use overlay_network::auth::generate_authentication;
use overlay_network::errors::NetworkError;
use overlay_network::types::{PeerMessage, PeerMessageContent, PeerMessageResponse, PROTOCOL_VERSION};
use tracing::{debug, warn};

impl Node {
    /// Sends a message to a node in the node table and returns its response.
    pub async fn send_peer_message(
        &self,
        destination: &NodeId,
        content: PeerMessageContent,
    ) -> Result<PeerMessageResponse, NodeError> {
        let message_type = content.message_type();
        let (url, public_key) = {
            let table = self.node_table();
            let entry = table
                .get(destination)
                .ok_or(NodeError::UnknownDestination(*destination))?;
            (entry.url.clone(), entry.node_public_key)
        };

        let content = content.to_bytes()?;
        let authentication = generate_authentication(
            &self.session_keys,
            &content,
            message_type,
            destination,
            &public_key,
            now_millis(),
        )?;

        let envelope = PeerMessage {
            version: PROTOCOL_VERSION,
            sender: self.node_id,
            authentication,
            content,
        }
        .to_bytes()?;

        debug!(to = ?destination, message_type = %message_type, "sending peer message");

        let timeout = self.config.protocol.communication_timeout();
        let response = tokio::time::timeout(timeout, self.transport.send(&url, envelope))
            .await
            .map_err(|_| NetworkError::Timeout(format!("{} response from {}", message_type, destination)))??;

        Ok(PeerMessageResponse::from_bytes(&response)?)
    }

    /// Sends a message and only logs failures.
    pub async fn tell(&self, destination: &NodeId, content: PeerMessageContent) {
        let message_type = content.message_type();

        if let Err(e) = self.send_peer_message(destination, content).await {
            SEND_FAILURES.inc();
            warn!(to = ?destination, message_type = %message_type, error = %e, "failed to send peer message");
        }
    }
}
