//! Point-to-point request/response transport for peer messages.

use crate::errors::NetworkError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

/// Path below a node's URL where it accepts peer messages.
pub const PEER_MESSAGE_PATH: &str = "peer";

/// Content type of a serialized peer message.
pub const PEER_MESSAGE_CONTENT_TYPE: &str = "application/x-overlay-peer-message";

/// Default bound on a single request in milliseconds.
pub const DEFAULT_COMMUNICATION_TIMEOUT: u64 = 30_000;

/// Delivers one serialized envelope to a node and returns its response body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str, envelope: Vec<u8>) -> Result<Vec<u8>, NetworkError>;
}

/// Sends peer messages as HTTP POST requests.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Returns the peer message endpoint of a node.
    pub fn endpoint(url: &str) -> String {
        format!("{}/{}", url.trim_end_matches('/'), PEER_MESSAGE_PATH)
    }

    async fn post(&self, endpoint: String, envelope: Vec<u8>) -> Result<Vec<u8>, NetworkError> {
        let response = self
            .client
            .post(&endpoint)
            .header(CONTENT_TYPE, PEER_MESSAGE_CONTENT_TYPE)
            .body(envelope)
            .send()
            .await
            .map_err(|e| NetworkError::TransportError(format!("{}: {}", endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Rejected(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| NetworkError::TransportError(format!("{}: {}", endpoint, e)))?;

        Ok(body.to_vec())
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_COMMUNICATION_TIMEOUT))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, url: &str, envelope: Vec<u8>) -> Result<Vec<u8>, NetworkError> {
        let endpoint = Self::endpoint(url);
        debug!(endpoint = %endpoint, bytes = envelope.len(), "sending peer message");

        tokio::time::timeout(self.timeout, self.post(endpoint.clone(), envelope))
            .await
            .map_err(|_| NetworkError::Timeout(format!("response from {}", endpoint)))?
    }
}
