//! mapshare-aprs - relay satellite tracker share-feed positions to APRS-IS
//!
//! Polls a location share feed, turns placemarks whose message opts in with an
//! `APRS` directive into position reports, and writes them to an APRS-IS server
//! over one long-lived session.

pub mod aprs_client;
pub mod aprs_packet;
pub mod config;
pub mod feed;
pub mod log_format;
pub mod metrics;
pub mod relay;
pub mod routing;
pub mod telemetry;
pub mod window;

pub use aprs_client::{AprsClient, AprsClientConfig, AprsClientConfigBuilder, PacketSink};
pub use aprs_packet::AprsPositionPacket;
pub use config::RelayConfig;
pub use feed::{FeedError, FeedSource, MapShareClient, Placemark};
pub use relay::{Relay, RelaySettings, TickReport};
pub use telemetry::TelemetryRecord;
pub use window::{PollWindow, WindowPolicy};

/// Placeholder vergen writes outside a git checkout
const VERGEN_PLACEHOLDER: &str = "VERGEN_IDEMPOTENT_OUTPUT";

/// Build version from `git describe`, or the Cargo package version when
/// the build had no git metadata
pub fn version() -> &'static str {
    match option_env!("VERGEN_GIT_DESCRIBE") {
        Some(describe) if !describe.is_empty() && describe != VERGEN_PLACEHOLDER => describe,
        _ => env!("CARGO_PKG_VERSION"),
    }
}
