use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;

/// How far the window start moves after a successful fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Move to one second past the newest placemark seen in the batch.
    /// Re-delivers nothing, but a placemark that arrives later with an older
    /// timestamp is never requested again.
    #[default]
    LatestTimestamp,
    /// Move to the end of the window that was just fetched.
    /// Placemarks the feed publishes more than one interval late are missed.
    FetchEnd,
}

impl fmt::Display for WindowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowPolicy::LatestTimestamp => write!(f, "latest-timestamp"),
            WindowPolicy::FetchEnd => write!(f, "fetch-end"),
        }
    }
}

impl FromStr for WindowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest-timestamp" => Ok(WindowPolicy::LatestTimestamp),
            "fetch-end" => Ok(WindowPolicy::FetchEnd),
            other => Err(format!(
                "unknown window policy '{}' (expected latest-timestamp or fetch-end)",
                other
            )),
        }
    }
}

/// Half-open interval `[start, end)` requested from the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl PollWindow {
    /// Empty window anchored at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { start, end: start }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Extend the window to `now` for the next fetch. The start is untouched,
    /// so a failed fetch is retried over the same (longer) range.
    pub fn extend_to(&mut self, now: DateTime<Utc>) {
        self.end = now.max(self.start);
    }

    /// Advance the start after a successful fetch. Never moves backwards.
    ///
    /// `latest` is the newest placemark timestamp handled in the batch, if any.
    pub fn advance(&mut self, policy: WindowPolicy, latest: Option<DateTime<Utc>>) {
        let candidate = match policy {
            WindowPolicy::LatestTimestamp => match latest {
                Some(latest) => latest + Duration::seconds(1),
                None => return,
            },
            WindowPolicy::FetchEnd => self.end,
        };

        if candidate > self.start {
            self.start = candidate;
        }
    }
}
