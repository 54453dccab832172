//! Prometheus exporter arguments.

use crate::{CliResult, init_prometheus_server};
use clap::Args;
use std::net::{IpAddr, Ipv4Addr};

/// Configures the Prometheus exporter.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct MetricsArgs {
    /// Serve Prometheus metrics over HTTP.
    #[arg(long = "metrics.enabled", env = "CHAINVAULT_METRICS_ENABLED", global = true)]
    pub enabled: bool,
    /// Address the metrics server binds to.
    #[arg(
        long = "metrics.addr",
        default_value = "0.0.0.0",
        env = "CHAINVAULT_METRICS_ADDR",
        global = true
    )]
    pub addr: IpAddr,
    /// Port the metrics server listens on. `0` picks a free port.
    #[arg(
        long = "metrics.port",
        default_value_t = 9090,
        env = "CHAINVAULT_METRICS_PORT",
        global = true
    )]
    pub port: u16,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { enabled: false, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 9090 }
    }
}

impl MetricsArgs {
    /// Starts the exporter if enabled.
    pub fn init_metrics(&self) -> CliResult<()> {
        if self.enabled {
            init_prometheus_server(self.addr, self.port)?;
        }
        Ok(())
    }
}
