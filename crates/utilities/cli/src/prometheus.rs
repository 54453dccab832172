//! Utilities for spinning up a prometheus metrics server.

use crate::PrometheusError;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{IpAddr, SocketAddr, TcpListener};
use tracing::info;

/// Start a Prometheus metrics server on the given address and port.
pub fn init_prometheus_server(addr: IpAddr, metrics_port: u16) -> Result<(), PrometheusError> {
    // Port 0 is resolved up front so the logged address is the real one.
    let actual_addr = if metrics_port == 0 {
        let listener = TcpListener::bind((addr, 0))?;
        listener.local_addr()?
    } else {
        SocketAddr::from((addr, metrics_port))
    };

    PrometheusBuilder::new().with_http_listener(actual_addr).install()?;

    info!(target: "prometheus", "Serving metrics at: http://{}", actual_addr);
    Ok(())
}
