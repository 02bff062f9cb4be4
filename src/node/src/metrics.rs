//! Metrics for the node daemon.

use anyhow::Result;
use lazy_static::lazy_static;
use overlay_core::node_table::{NodeTable, NodeTableEvent, NodeTableObserver};
use overlay_core::routing::RoutingTableHandle;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter, IntCounterVec, IntGauge,
    Opts, TextEncoder,
};
use std::net::SocketAddr;
use tracing::warn;
use warp::Filter;

lazy_static! {
    /// Counter for incoming peer messages, by message type.
    pub static ref PEER_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        Opts::new(
            "peer_messages_received_total",
            "Total number of peer messages received"
        ),
        &["type"]
    )
    .unwrap();

    /// Counter for incoming messages rejected for lack of authentication.
    pub static ref AUTHENTICATION_FAILURES: IntCounter = register_int_counter!(
        Opts::new(
            "peer_authentication_failures_total",
            "Total number of peer messages that failed authentication"
        )
    )
    .unwrap();

    /// Counter for link-state updates, by what happened to them.
    pub static ref LINK_STATE_UPDATES: IntCounterVec = register_int_counter_vec!(
        Opts::new(
            "link_state_updates_total",
            "Total number of link-state updates processed"
        ),
        &["outcome"]
    )
    .unwrap();

    /// Counter for link-state updates sent while flooding.
    pub static ref LINK_STATE_RETRANSMISSIONS: IntCounter = register_int_counter!(
        Opts::new(
            "link_state_retransmissions_total",
            "Total number of link-state updates relayed to peers"
        )
    )
    .unwrap();

    /// Counter for outbound messages that failed.
    pub static ref SEND_FAILURES: IntCounter = register_int_counter!(
        Opts::new(
            "peer_send_failures_total",
            "Total number of peer messages that could not be delivered"
        )
    )
    .unwrap();

    /// Gauge for the number of peered nodes.
    pub static ref PEER_COUNT: IntGauge = register_int_gauge!(
        Opts::new(
            "peers",
            "Number of peered nodes"
        )
    )
    .unwrap();

    /// Gauge for the number of routes in the routing table.
    pub static ref ROUTE_COUNT: IntGauge = register_int_gauge!(
        Opts::new(
            "routes",
            "Number of reachable destinations"
        )
    )
    .unwrap();
}

/// Keeps the peer and route gauges current.
///
/// Must be registered after the route computer so it sees the new routes.
pub struct TableMetrics {
    routes: RoutingTableHandle,
}

impl TableMetrics {
    pub fn new(routes: RoutingTableHandle) -> Self {
        Self { routes }
    }
}

impl NodeTableObserver for TableMetrics {
    fn on_event(&self, event: &NodeTableEvent, table: &NodeTable) {
        if let NodeTableEvent::NodeUpdated {
            peer_state_changed: true,
            ..
        } = event
        {
            PEER_COUNT.set(table.peers().len() as i64);
        }

        if event.affects_topology() {
            ROUTE_COUNT.set(self.routes.snapshot().len() as i64);
        }
    }
}

fn gather_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Starts the metrics server.
pub async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    let metrics_route = warp::path("metrics").map(|| match gather_metrics() {
        Ok(body) => body,
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            String::new()
        }
    });

    tokio::spawn(async move {
        warp::serve(metrics_route).run(addr).await;
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_gather_includes_registered_metrics() {
        PEER_MESSAGES_RECEIVED.with_label_values(&["linkStateUpdate"]).inc();
        SEND_FAILURES.inc();

        let body = gather_metrics().unwrap();
        assert!(body.contains("peer_messages_received_total"));
        assert!(body.contains("peer_send_failures_total"));
    }
}
