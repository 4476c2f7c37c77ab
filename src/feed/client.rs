use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

use super::{FeedError, FeedSource, Placemark, parse_feed};
use crate::window::PollWindow;

/// Public share feed endpoint
pub const DEFAULT_FEED_URL: &str = "https://share.garmin.com/feed/Share";

/// Timestamp layout the feed accepts for `d1`/`d2`
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Configuration for the share feed client
#[derive(Debug, Clone)]
pub struct MapShareClientConfig {
    /// Feed endpoint without the trailing feed id
    pub base_url: String,
    /// Share page identifier appended to the base URL
    pub feed_id: String,
    /// Share page password, sent as basic auth with an empty user name
    pub password: Option<String>,
    /// Whole-request timeout; `None` keeps the transport default (no timeout)
    pub timeout: Option<Duration>,
}

/// HTTP client for the location share feed
#[derive(Clone)]
pub struct MapShareClient {
    client: Client,
    config: MapShareClientConfig,
}

impl MapShareClient {
    pub fn new(client: Client, config: MapShareClientConfig) -> Self {
        Self { client, config }
    }

    /// Full feed URL without query parameters
    pub fn feed_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.feed_id
        )
    }

    fn format_query_time(time: DateTime<Utc>) -> String {
        time.format(QUERY_TIME_FORMAT).to_string()
    }
}

#[async_trait]
impl FeedSource for MapShareClient {
    #[tracing::instrument(skip(self, window), fields(d1 = %window.start(), d2 = %window.end()))]
    async fn fetch(&self, window: &PollWindow) -> Result<Vec<Placemark>, FeedError> {
        let url = self.feed_url();
        let d1 = Self::format_query_time(window.start());
        let d2 = Self::format_query_time(window.end());
        debug!("Fetching {}?d1={}&d2={}", url, d1, d2);

        let mut request = self
            .client
            .get(&url)
            .query(&[("d1", d1.as_str()), ("d2", d2.as_str())]);

        if let Some(password) = &self.config.password {
            request = request.basic_auth("", Some(password));
        }
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(FeedError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status { status, body });
        }

        let body = response.text().await.map_err(FeedError::Body)?;
        let placemarks = parse_feed(&body)?;

        info!(
            "Fetched {} placemark(s) from feed {} ({} .. {})",
            placemarks.len(),
            self.config.feed_id,
            d1,
            d2
        );

        Ok(placemarks)
    }
}
