use anyhow::{Result, bail};
use clap::Parser;
use clap::builder::BoolishValueParser;
use std::time::Duration;

use crate::aprs_client::{AprsClientConfig, AprsClientConfigBuilder};
use crate::feed::{DEFAULT_FEED_URL, MapShareClientConfig};
use crate::relay::{DEFAULT_POLL_INTERVAL, RelaySettings};
use crate::routing::{EligibilityPolicy, IdentityDefaults};
use crate::window::WindowPolicy;

/// Relay configuration. Every option can also be set through the environment
/// (or a `.env` file in the working directory).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mapshare-aprs",
    version = crate::version(),
    about = "Relay satellite tracker share-feed positions to APRS-IS."
)]
pub struct RelayConfig {
    /// Share page identifier (the last path segment of the share URL)
    #[arg(long, env = "MAPSHARE_ID")]
    pub mapshare_id: String,

    /// Poll interval in seconds; 0, empty or unparseable selects the default of 60
    #[arg(
        long = "interval",
        env = "MAPSHARE_INTERVAL",
        default_value_t = 0,
        value_parser = parse_interval_seconds
    )]
    pub interval_seconds: u64,

    /// Share page password, if the page is protected
    #[arg(long, env = "MAPSHARE_PASSWORD", hide_env_values = true)]
    pub mapshare_password: Option<String>,

    /// Feed endpoint the share id is appended to
    #[arg(long, env = "MAPSHARE_URL", default_value = DEFAULT_FEED_URL)]
    pub mapshare_url: String,

    /// Feed request timeout in seconds (no timeout when unset)
    #[arg(long, env = "MAPSHARE_TIMEOUT")]
    pub mapshare_timeout: Option<u64>,

    /// APRS-IS server hostname
    #[arg(long, env = "APRS_HOST")]
    pub aprs_host: String,

    /// APRS-IS server port
    #[arg(long, env = "APRS_PORT", default_value_t = 14580)]
    pub aprs_port: u16,

    /// Callsign used to log in to APRS-IS
    #[arg(long, env = "APRS_USER")]
    pub aprs_user: String,

    /// APRS-IS passcode for the login callsign
    #[arg(long, env = "APRS_PASSCODE", hide_env_values = true)]
    pub aprs_passcode: String,

    /// Send `vers <software> <version>` in the APRS-IS login line
    #[arg(
        long,
        env = "APRS_LOGIN_VERSION",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub aprs_login_version: bool,

    /// Callsign used when a message does not name one (defaults to the login callsign)
    #[arg(long, env = "APRS_DEFAULT_CALLSIGN")]
    pub default_callsign: Option<String>,

    /// Symbol table and code used when a message does not name one
    #[arg(long, env = "APRS_DEFAULT_SYMBOL", default_value = "")]
    pub default_symbol: String,

    /// Comment used when a message does not provide one
    #[arg(long, env = "APRS_DEFAULT_COMMENT", default_value = "")]
    pub default_comment: String,

    /// How the feed window advances after a successful poll
    #[arg(long, env = "WINDOW_POLICY", default_value_t = WindowPolicy::LatestTimestamp)]
    pub window_policy: WindowPolicy,

    /// Only relay messages that name a callsign (`APRS:<callsign>...`)
    #[arg(
        long,
        env = "REQUIRE_CALLSIGN",
        default_value_t = false,
        action = clap::ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub require_callsign: bool,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Sentry DSN for error reporting
    #[arg(long, env = "SENTRY_DSN", hide_env_values = true)]
    pub sentry_dsn: Option<String>,
}

/// Interval values that are not a positive integer fall back to the default
fn parse_interval_seconds(value: &str) -> Result<u64, String> {
    Ok(value.trim().parse().unwrap_or(0))
}

impl RelayConfig {
    /// Reject values clap accepts but the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("MAPSHARE_ID", &self.mapshare_id),
            ("MAPSHARE_URL", &self.mapshare_url),
            ("APRS_HOST", &self.aprs_host),
            ("APRS_USER", &self.aprs_user),
            ("APRS_PASSCODE", &self.aprs_passcode),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                bail!("{} is empty", name);
            }
        }

        if self.aprs_port == 0 {
            bail!("APRS_PORT must be non-zero");
        }
        if self.mapshare_timeout == Some(0) {
            bail!("MAPSHARE_TIMEOUT must be at least one second");
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        match self.interval_seconds {
            0 => DEFAULT_POLL_INTERVAL,
            seconds => Duration::from_secs(seconds),
        }
    }

    pub fn eligibility(&self) -> EligibilityPolicy {
        if self.require_callsign {
            EligibilityPolicy::RequireCallsign
        } else {
            EligibilityPolicy::MarkerOnly
        }
    }

    pub fn identity_defaults(&self) -> IdentityDefaults {
        let callsign = self
            .default_callsign
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(self.aprs_user.as_str());

        IdentityDefaults {
            callsign: callsign.to_string(),
            symbol: self.default_symbol.clone(),
            comment: self.default_comment.clone(),
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            interval: self.poll_interval(),
            defaults: self.identity_defaults(),
            window_policy: self.window_policy,
            eligibility: self.eligibility(),
        }
    }

    pub fn feed_client_config(&self) -> MapShareClientConfig {
        MapShareClientConfig {
            base_url: self.mapshare_url.clone(),
            feed_id: self.mapshare_id.clone(),
            password: self
                .mapshare_password
                .clone()
                .filter(|password| !password.is_empty()),
            timeout: self.mapshare_timeout.map(Duration::from_secs),
        }
    }

    pub fn aprs_client_config(&self) -> AprsClientConfig {
        let builder = AprsClientConfigBuilder::new()
            .server(&self.aprs_host)
            .port(self.aprs_port)
            .callsign(&self.aprs_user)
            .passcode(&self.aprs_passcode);

        if self.aprs_login_version {
            builder.build()
        } else {
            builder.without_software_version().build()
        }
    }
}
