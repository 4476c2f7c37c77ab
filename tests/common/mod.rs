//! Shared helpers for integration tests
//!
//! Provides a scripted feed source and a minimal APRS-IS server that records
//! every line it receives.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mapshare_aprs::feed::DataEntry;
use mapshare_aprs::{FeedError, FeedSource, Placemark, PollWindow};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Feed that replays a fixed list of responses, then returns empty batches
#[derive(Default)]
pub struct ScriptedFeed {
    responses: Mutex<VecDeque<Result<Vec<Placemark>, FeedError>>>,
    pub requests: Mutex<Vec<PollWindow>>,
}

impl ScriptedFeed {
    pub fn new(responses: Vec<Result<Vec<Placemark>, FeedError>>) -> Self {
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

pub fn utc(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, minute, second)
        .unwrap()
}

pub fn placemark(
    timestamp: DateTime<Utc>,
    description: &str,
    entries: &[(&str, &str)],
) -> Placemark {
    Placemark {
        timestamp: Some(timestamp),
        description: description.to_string(),
        extended_data: entries
            .iter()
            .map(|(name, value)| DataEntry {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect(),
    }
}

/// Local stand-in for an APRS-IS server.
///
/// Accepts any number of connections and forwards every received line,
/// tagged with the connection number, to the returned channel.
pub async fn spawn_aprs_server() -> (u16, mpsc::UnboundedReceiver<(usize, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut connection = 0;
        while let Ok((stream, _)) = listener.accept().await {
            connection += 1;
            let tx = tx.clone();
            let id = connection;
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.starts_with("user ") {
                        let callsign = line.split_whitespace().nth(1).unwrap_or_default();
                        let response =
                            format!("# logresp {} verified, server T2TEST\r\n", callsign);
                        let _ = writer.write_all(response.as_bytes()).await;
                    }
                    if tx.send((id, line)).is_err() {
                        break;
                    }
                }
            });
        }
    });

    (port, rx)
}
