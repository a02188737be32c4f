use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::info;

use crate::config::MetricsConfig;
use crate::utils::error::{AppError, Result};

/// Installs the global Prometheus recorder with its scrape endpoint.
/// Without it the `metrics` macros are no-ops.
pub fn install_exporter(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::Internal(format!("Failed to install metrics exporter: {}", e)))?;

    info!(%addr, "Prometheus exporter listening");
    Ok(())
}
