use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Start the Prometheus exporter on `0.0.0.0:<port>`.
///
/// Must be called from within a tokio runtime; the listener runs as a
/// background task for the life of the process.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start metrics exporter on {}", addr))?;

    info!("Serving Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}

/// Initialize relay metrics to zero/default values
/// This ensures metrics always appear in Prometheus queries even if no events have occurred
pub fn initialize_relay_metrics() {
    // Poll loop
    metrics::counter!("relay.tick_total").absolute(0);
    for kind in ["transport", "status", "body", "decode"] {
        metrics::counter!("relay.fetch.failed_total", "kind" => kind).absolute(0);
    }
    metrics::gauge!("relay.window.lag_seconds").set(0.0);

    // Placemarks
    metrics::counter!("relay.placemark.received_total").absolute(0);
    metrics::counter!("relay.placemark.ineligible_total").absolute(0);
    metrics::counter!("relay.placemark.skipped_total").absolute(0);

    // Packets
    metrics::counter!("relay.packet.sent_total").absolute(0);
    metrics::counter!("relay.packet.failed_total").absolute(0);

    // APRS-IS session
    metrics::counter!("aprs.connection.established_total").absolute(0);
    metrics::counter!("aprs.connection.failed_total").absolute(0);
    metrics::gauge!("aprs.connection.connected").set(0.0);
}
