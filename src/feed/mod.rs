//! Location share feed: fetching and decoding.

mod client;
mod document;

use async_trait::async_trait;

use crate::window::PollWindow;

pub use client::{DEFAULT_FEED_URL, MapShareClient, MapShareClientConfig};
pub use document::{DataEntry, Placemark, parse_feed};

/// Per-tick feed failures. All of them are retried on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("feed returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to read feed body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("failed to decode feed document: {0}")]
    Decode(#[from] quick_xml::DeError),
}

impl FeedError {
    /// Short label used as a metrics dimension
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::Transport(_) => "transport",
            FeedError::Status { .. } => "status",
            FeedError::Body(_) => "body",
            FeedError::Decode(_) => "decode",
        }
    }
}

/// Source of placemarks for a time window
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch every placemark the feed reports within `window`, in feed order
    async fn fetch(&self, window: &PollWindow) -> Result<Vec<Placemark>, FeedError>;
}
