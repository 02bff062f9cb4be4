//! HTTP endpoint that receives peer messages.

use crate::errors::NodeError;
use crate::Node;
use anyhow::Result;
use overlay_network::transport::{PEER_MESSAGE_CONTENT_TYPE, PEER_MESSAGE_PATH};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

fn status_for(error: &NodeError) -> StatusCode {
    match error {
        NodeError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        e if e.is_bad_request() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handle_peer_request(node: Arc<Node>, body: Bytes) -> Result<warp::reply::Response, Infallible> {
    let response = match node.handle_peer_message(&body) {
        Ok(bytes) => warp::reply::with_header(bytes, "content-type", PEER_MESSAGE_CONTENT_TYPE).into_response(),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!("Failed to handle peer message: {}", e);
            }
            warp::reply::with_status(e.to_string(), status).into_response()
        }
    };

    Ok(response)
}

/// `POST /peer` taking a serialized envelope and answering with the
/// serialized response.
pub fn peer_route(node: Arc<Node>) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::post()
        .and(warp::path(PEER_MESSAGE_PATH))
        .and(warp::path::end())
        .and(warp::any().map(move || node.clone()))
        .and(warp::body::bytes())
        .and_then(handle_peer_request)
}

/// Starts the peer message server.
pub async fn start_peer_server(addr: SocketAddr, node: Arc<Node>) -> Result<()> {
    info!("Starting peer server on {}", addr);

    tokio::spawn(async move {
        warp::serve(peer_route(node)).run(addr).await;
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use async_trait::async_trait;
    use overlay_core::crypto::NodeKeypair;
    use overlay_network::errors::NetworkError;
    use overlay_network::transport::Transport;
    use overlay_network::types::{
        Authentication, LinkStateLookup, PeerMessage, PeerMessageContent, PeerMessageResponse, PROTOCOL_VERSION,
    };
    use tokio::runtime::Runtime;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn send(&self, url: &str, _envelope: Vec<u8>) -> std::result::Result<Vec<u8>, NetworkError> {
            Err(NetworkError::TransportError(format!("no route to {}", url)))
        }
    }

    fn test_node() -> Arc<Node> {
        let config = NodeConfig {
            url: "http://127.0.0.1:7768".to_string(),
            ..NodeConfig::default()
        };
        Arc::new(Node::new(config, NodeKeypair::generate(), Arc::new(NoTransport)).unwrap())
    }

    fn anonymous(sender: &NodeKeypair, content: PeerMessageContent) -> Vec<u8> {
        PeerMessage {
            version: PROTOCOL_VERSION,
            sender: sender.node_id(),
            authentication: Authentication::None,
            content: content.to_bytes().unwrap(),
        }
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn test_link_state_request_is_answered_anonymously() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let node = test_node();
            let stranger = NodeKeypair::generate();
            let body = anonymous(
                &stranger,
                PeerMessageContent::LinkStateRequest {
                    node_ids: vec![node.node_id(), stranger.node_id()],
                },
            );

            let res = warp::test::request()
                .method("POST")
                .path("/peer")
                .body(body)
                .reply(&peer_route(node.clone()))
                .await;

            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(res.headers()["content-type"], PEER_MESSAGE_CONTENT_TYPE);

            match PeerMessageResponse::from_bytes(res.body()).unwrap() {
                PeerMessageResponse::LinkState(lookups) => {
                    assert_eq!(lookups.len(), 2);
                    assert!(matches!(lookups[0], LinkStateLookup::Found(_)));
                    assert_eq!(lookups[1], LinkStateLookup::NotFound(stranger.node_id()));
                }
                other => panic!("unexpected response {:?}", other),
            }
        });
    }

    #[test]
    fn test_unauthenticated_update_is_unauthorized() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let node = test_node();
            let stranger = NodeKeypair::generate();
            let body = anonymous(
                &stranger,
                PeerMessageContent::LinkStateUpdate {
                    signed_node_info: vec![1, 2, 3],
                },
            );

            let res = warp::test::request()
                .method("POST")
                .path("/peer")
                .body(body)
                .reply(&peer_route(node))
                .await;

            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        });
    }

    #[test]
    fn test_garbage_is_bad_request() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let res = warp::test::request()
                .method("POST")
                .path("/peer")
                .body(vec![0xff; 7])
                .reply(&peer_route(test_node()))
                .await;

            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        });
    }

    #[test]
    fn test_other_methods_are_not_routed() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let res = warp::test::request()
                .method("GET")
                .path("/peer")
                .reply(&peer_route(test_node()))
                .await;

            assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        });
    }
}
