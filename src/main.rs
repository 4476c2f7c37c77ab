use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::IsTerminal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mapshare_aprs::log_format::TargetFirstFormat;
use mapshare_aprs::{AprsClient, MapShareClient, Relay, RelayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = RelayConfig::parse();

    let sentry_guard = init_sentry(config.sentry_dsn.as_deref())?;
    init_tracing(sentry_guard.is_some());

    config.validate().context("Invalid configuration")?;

    info!(
        "Starting {} {} for feed {} -> {}:{}",
        env!("CARGO_PKG_NAME"),
        mapshare_aprs::version(),
        config.mapshare_id,
        config.aprs_host,
        config.aprs_port
    );

    // Initialize metrics before the exporter starts so scrapes see every series
    mapshare_aprs::metrics::initialize_relay_metrics();
    if let Some(port) = config.metrics_port {
        mapshare_aprs::metrics::start_metrics_server(port)?;
    }

    let http = reqwest::Client::builder()
        .user_agent(format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            mapshare_aprs::version()
        ))
        .build()
        .context("Failed to build HTTP client")?;

    let feed = MapShareClient::new(http, config.feed_client_config());
    let aprs = AprsClient::new(config.aprs_client_config());

    let mut relay = Relay::new(feed, aprs, config.relay_settings(), Utc::now());
    relay.run(shutdown_signal()).await;
    relay.sink_mut().close().await;

    info!("Relay stopped");
    Ok(())
}

fn init_sentry(dsn: Option<&str>) -> Result<Option<sentry::ClientInitGuard>> {
    let Some(dsn) = dsn.filter(|d| !d.trim().is_empty()) else {
        return Ok(None);
    };

    let dsn: sentry::types::Dsn = dsn.trim().parse().context("Invalid SENTRY_DSN")?;
    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        release: Some(mapshare_aprs::version().into()),
        ..Default::default()
    });
    Ok(Some(guard))
}

fn init_tracing(with_sentry: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .event_format(TargetFirstFormat::new(std::io::stdout().is_terminal()));

    // Use error! for anything that should reach Sentry as an event
    let sentry_layer = with_sentry.then(|| sentry_tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(sentry_layer)
        .init();
}

/// Resolves on Ctrl+C. If the handler cannot be installed the relay runs
/// until the process is killed.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            error!("Graceful shutdown unavailable, relay will run until killed");
            std::future::pending::<()>().await;
        }
    }
}
