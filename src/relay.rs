use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::aprs_client::PacketSink;
use crate::aprs_packet::AprsPositionPacket;
use crate::feed::{FeedError, FeedSource, Placemark};
use crate::routing::{EligibilityPolicy, Identity, IdentityDefaults, resolve_identity};
use crate::telemetry::TelemetryRecord;
use crate::window::{PollWindow, WindowPolicy};

/// Feet per metre, to three decimals
const FEET_PER_METER: f64 = 3.281;
/// Kilometres per hour in one knot
const KMH_PER_KNOT: f64 = 1.852;

/// Poll interval used when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Static behaviour of the relay loop
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub interval: Duration,
    pub defaults: IdentityDefaults,
    pub window_policy: WindowPolicy,
    pub eligibility: EligibilityPolicy,
}

/// Outcome of one successful tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Placemarks returned by the feed
    pub placemarks: usize,
    /// Packets accepted by the sink
    pub relayed: usize,
    /// Placemarks without a timestamp, without the directive, or without a callsign
    pub skipped: usize,
    /// Packets the sink failed to deliver
    pub failed: usize,
}

/// Build the packet for a record under the resolved identity
pub fn build_packet(record: &TelemetryRecord, identity: Identity) -> AprsPositionPacket {
    AprsPositionPacket {
        callsign: identity.callsign,
        timestamp: Some(record.timestamp),
        latitude: record.latitude,
        longitude: record.longitude,
        symbol: identity.symbol,
        course_degrees: record.course_degrees as i64,
        speed_knots: (record.speed_kmh / KMH_PER_KNOT) as i64,
        altitude_feet: (record.elevation_meters * FEET_PER_METER) as i64,
        comment: identity.comment,
    }
}

/// Poll loop bridging a placemark feed to a packet sink.
///
/// Owns the dedup window; one tick runs fetch, decode and relay to completion
/// before the next one starts.
pub struct Relay<F, S> {
    feed: F,
    sink: S,
    settings: RelaySettings,
    window: PollWindow,
}

impl<F: FeedSource, S: PacketSink> Relay<F, S> {
    /// Create a relay whose first window starts at `start`
    pub fn new(feed: F, sink: S, settings: RelaySettings, start: DateTime<Utc>) -> Self {
        Self {
            feed,
            sink,
            settings,
            window: PollWindow::new(start),
        }
    }

    pub fn window(&self) -> &PollWindow {
        &self.window
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Run one poll cycle with the window ending at `now`.
    ///
    /// On a fetch or decode error the window start is left where it was.
    #[tracing::instrument(skip(self), fields(d1 = %self.window.start()))]
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport, FeedError> {
        metrics::counter!("relay.tick_total").increment(1);
        self.window.extend_to(now);

        let placemarks = match self.feed.fetch(&self.window).await {
            Ok(placemarks) => placemarks,
            Err(e) => {
                metrics::counter!("relay.fetch.failed_total", "kind" => e.kind()).increment(1);
                return Err(e);
            }
        };

        let mut report = TickReport {
            placemarks: placemarks.len(),
            ..TickReport::default()
        };
        metrics::counter!("relay.placemark.received_total").increment(placemarks.len() as u64);

        let mut latest: Option<DateTime<Utc>> = None;
        for placemark in &placemarks {
            if let Some(timestamp) = placemark.timestamp {
                latest = Some(latest.map_or(timestamp, |l| l.max(timestamp)));
            }
            self.relay_placemark(placemark, &mut report).await;
        }

        self.window.advance(self.settings.window_policy, latest);
        metrics::gauge!("relay.window.lag_seconds")
            .set((now - self.window.start()).num_seconds().max(0) as f64);

        debug!(
            "Tick complete: {} placemark(s), {} relayed, {} skipped, {} failed; next window starts {}",
            report.placemarks,
            report.relayed,
            report.skipped,
            report.failed,
            self.window.start()
        );

        Ok(report)
    }

    async fn relay_placemark(&mut self, placemark: &Placemark, report: &mut TickReport) {
        let Some(record) = TelemetryRecord::from_placemark(placemark) else {
            metrics::counter!("relay.placemark.skipped_total").increment(1);
            report.skipped += 1;
            return;
        };

        let Some(identity) =
            resolve_identity(&record, &self.settings.defaults, self.settings.eligibility)
        else {
            debug!(
                "Placemark at {} has no routing directive, not relaying",
                record.timestamp
            );
            metrics::counter!("relay.placemark.ineligible_total").increment(1);
            report.skipped += 1;
            return;
        };

        if identity.callsign.is_empty() {
            warn!(
                "Placemark at {} resolved to an empty callsign, not relaying",
                record.timestamp
            );
            metrics::counter!("relay.placemark.skipped_total").increment(1);
            report.skipped += 1;
            return;
        }

        let packet = build_packet(&record, identity);
        match self.sink.send(&packet).await {
            Ok(()) => {
                metrics::counter!("relay.packet.sent_total").increment(1);
                report.relayed += 1;
                info!("{}", packet.encode().trim_end());
            }
            Err(e) => {
                metrics::counter!("relay.packet.failed_total").increment(1);
                report.failed += 1;
                error!(
                    "Failed to relay packet for {} at {}: {:#}",
                    packet.callsign, record.timestamp, e
                );
            }
        }
    }

    /// Poll until `shutdown` resolves: sleep one interval, tick, repeat.
    pub async fn run<Sd>(&mut self, shutdown: Sd)
    where
        Sd: Future<Output = ()>,
    {
        info!(
            "Relay started: polling every {}s, window policy {}, eligibility {}",
            self.settings.interval.as_secs(),
            self.settings.window_policy,
            self.settings.eligibility
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping relay");
                    break;
                }
                _ = tokio::time::sleep(self.settings.interval) => {}
            }

            // A tick always runs to completion; shutdown is only observed between ticks
            if let Err(e) = self.tick(Utc::now()).await {
                error!("Feed poll failed, retrying next interval: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::DataEntry;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Feed that replays a script of responses and records requested windows
    #[derive(Default)]
    struct ScriptedFeed {
        responses: Mutex<VecDeque<Result<Vec<Placemark>, FeedError>>>,
        requests: Mutex<Vec<PollWindow>>,
    }

    impl ScriptedFeed {
        fn new(responses: Vec<Result<Vec<Placemark>, FeedError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedFeed {
        async fn fetch(&self, window: &PollWindow) -> Result<Vec<Placemark>, FeedError> {
            self.requests.lock().unwrap().push(*window);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        lines: Vec<String>,
        fail_callsigns: Vec<String>,
    }

    #[async_trait]
    impl PacketSink for RecordingSink {
        async fn send(&mut self, packet: &AprsPositionPacket) -> anyhow::Result<()> {
            if self.fail_callsigns.contains(&packet.callsign) {
                return Err(anyhow!("connection reset"));
            }
            self.lines.push(packet.encode());
            Ok(())
        }
    }

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 15, minute, second).unwrap()
    }

    fn settings(window_policy: WindowPolicy) -> RelaySettings {
        RelaySettings {
            interval: DEFAULT_POLL_INTERVAL,
            defaults: IdentityDefaults {
                callsign: "N0DEF".to_string(),
                symbol: "/[".to_string(),
                comment: String::new(),
            },
            window_policy,
            eligibility: EligibilityPolicy::MarkerOnly,
        }
    }

    fn placemark(timestamp: DateTime<Utc>, description: &str) -> Placemark {
        Placemark {
            timestamp: Some(timestamp),
            description: description.to_string(),
            extended_data: vec![
                DataEntry {
                    name: "Latitude".to_string(),
                    value: "47.6".to_string(),
                },
                DataEntry {
                    name: "Longitude".to_string(),
                    value: "-122.3".to_string(),
                },
            ],
        }
    }

    fn decode_error() -> FeedError {
        FeedError::Decode(quick_xml::DeError::Custom("truncated document".to_string()))
    }

    #[test]
    fn test_build_packet_converts_units() {
        let record = TelemetryRecord {
            timestamp: at(4, 0),
            latitude: 47.6,
            longitude: -122.3,
            elevation_meters: 100.0,
            course_degrees: 271.9,
            speed_kmh: 20.0,
            ..TelemetryRecord::default()
        };
        let identity = Identity {
            callsign: "W7ABC".to_string(),
            symbol: "/k".to_string(),
            comment: String::new(),
        };

        let packet = build_packet(&record, identity);
        assert_eq!(packet.altitude_feet, 328);
        assert_eq!(packet.course_degrees, 271);
        assert_eq!(packet.speed_knots, 10);
        assert_eq!(packet.timestamp, Some(at(4, 0)));
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_window_start() {
        let feed = ScriptedFeed::new(vec![Err(decode_error())]);
        let mut relay = Relay::new(
            feed,
            RecordingSink::default(),
            settings(WindowPolicy::LatestTimestamp),
            at(0, 0),
        );

        let before = relay.window().start();
        assert!(relay.tick(at(1, 0)).await.is_err());
        assert_eq!(relay.window().start(), before);

        // Retry covers the same start with a later end
        relay.tick(at(2, 0)).await.unwrap();
        let requests = relay.feed.requests.lock().unwrap();
        assert_eq!(requests[1].start(), before);
        assert_eq!(requests[1].end(), at(2, 0));
    }

    #[tokio::test]
    async fn test_latest_timestamp_policy_advances_past_newest() {
        let feed = ScriptedFeed::new(vec![Ok(vec![
            placemark(at(0, 30), "APRS:W7ABC"),
            placemark(at(0, 50), "just checking in"),
            placemark(at(0, 40), "APRS:K1XYZ"),
        ])]);
        let mut relay = Relay::new(
            feed,
            RecordingSink::default(),
            settings(WindowPolicy::LatestTimestamp),
            at(0, 0),
        );

        let report = relay.tick(at(1, 0)).await.unwrap();
        assert_eq!(
            report,
            TickReport {
                placemarks: 3,
                relayed: 2,
                skipped: 1,
                failed: 0,
            }
        );
        assert_eq!(relay.window().start(), at(0, 51));

        // Feed order is preserved
        assert!(relay.sink().lines[0].starts_with("W7ABC>"));
        assert!(relay.sink().lines[1].starts_with("K1XYZ>"));
    }

    #[tokio::test]
    async fn test_fetch_end_policy_advances_to_window_end() {
        let feed = ScriptedFeed::new(vec![Ok(Vec::new())]);
        let mut relay = Relay::new(
            feed,
            RecordingSink::default(),
            settings(WindowPolicy::FetchEnd),
            at(0, 0),
        );

        relay.tick(at(1, 0)).await.unwrap();
        assert_eq!(relay.window().start(), at(1, 0));
    }

    #[tokio::test]
    async fn test_send_failure_does_not_abort_batch_or_pin_window() {
        let feed = ScriptedFeed::new(vec![Ok(vec![
            placemark(at(0, 10), "APRS:BAD1"),
            placemark(at(0, 20), "APRS:GOOD1"),
        ])]);
        let sink = RecordingSink {
            fail_callsigns: vec!["BAD1".to_string()],
            ..RecordingSink::default()
        };
        let mut relay = Relay::new(
            feed,
            sink,
            settings(WindowPolicy::LatestTimestamp),
            at(0, 0),
        );

        let report = relay.tick(at(1, 0)).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.relayed, 1);
        assert_eq!(relay.sink().lines.len(), 1);
        assert_eq!(relay.window().start(), at(0, 21));
    }

    #[tokio::test]
    async fn test_placemark_without_timestamp_is_skipped() {
        let mut track = placemark(at(0, 10), "APRS:W7ABC");
        track.timestamp = None;
        let feed = ScriptedFeed::new(vec![Ok(vec![track])]);
        let mut relay = Relay::new(
            feed,
            RecordingSink::default(),
            settings(WindowPolicy::LatestTimestamp),
            at(0, 0),
        );

        let report = relay.tick(at(1, 0)).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(relay.sink().lines.is_empty());
        assert_eq!(relay.window().start(), at(0, 0));
    }

    #[tokio::test]
    async fn test_empty_callsign_is_not_relayed() {
        let feed = ScriptedFeed::new(vec![Ok(vec![placemark(at(0, 10), "APRS")])]);
        let mut s = settings(WindowPolicy::LatestTimestamp);
        s.defaults.callsign = String::new();
        let mut relay = Relay::new(feed, RecordingSink::default(), s, at(0, 0));

        let report = relay.tick(at(1, 0)).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(relay.sink().lines.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let feed = ScriptedFeed::default();
        let mut relay = Relay::new(
            feed,
            RecordingSink::default(),
            settings(WindowPolicy::FetchEnd),
            Utc::now(),
        );

        // Paused clock: sleeps auto-advance, so three intervals pass instantly
        relay
            .run(tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3 + Duration::from_secs(1)))
            .await;

        assert_eq!(relay.feed.requests.lock().unwrap().len(), 3);
    }
}
