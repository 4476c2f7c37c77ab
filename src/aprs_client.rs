use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::aprs_packet::AprsPositionPacket;

/// Destination for encoded position reports
#[async_trait]
pub trait PacketSink: Send {
    /// Deliver one packet. Packets are delivered in call order.
    async fn send(&mut self, packet: &AprsPositionPacket) -> Result<()>;
}

/// Configuration for the APRS-IS uplink
#[derive(Debug, Clone)]
pub struct AprsClientConfig {
    /// APRS server hostname
    pub server: String,
    /// APRS server port
    pub port: u16,
    /// Callsign for authentication
    pub callsign: String,
    /// APRS-IS passcode for the login callsign
    pub passcode: String,
    /// Software name sent in the login `vers` clause; empty omits the clause
    pub software: String,
    /// Software version sent in the login `vers` clause
    pub version: String,
}

impl Default for AprsClientConfig {
    fn default() -> Self {
        Self {
            server: "rotate.aprs2.net".to_string(),
            port: 14580,
            callsign: "N0CALL".to_string(),
            passcode: "-1".to_string(),
            software: env!("CARGO_PKG_NAME").to_string(),
            version: crate::version().to_string(),
        }
    }
}

/// One authenticated TCP session
struct Session {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
    peer: String,
}

impl Session {
    /// The server closed the connection or the read side failed
    fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// APRS-IS uplink holding one long-lived authenticated session.
///
/// Connects lazily on the first send and reconnects when the session drops.
pub struct AprsClient {
    config: AprsClientConfig,
    session: Option<Session>,
}

impl AprsClient {
    /// Create a new APRS client
    pub fn new(config: AprsClientConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// Write one line, reconnecting and retrying once if the session is broken
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let mut last_error = None;

        for attempt in 0..2 {
            if self.session.as_ref().is_some_and(Session::is_closed) {
                info!("APRS session closed by server, reconnecting");
                self.drop_session();
            }

            if self.session.is_none() {
                match Self::connect(&self.config).await {
                    Ok(session) => self.session = Some(session),
                    Err(e) => {
                        metrics::counter!("aprs.connection.failed_total").increment(1);
                        // A failed connect is not retried within the same send
                        return Err(e);
                    }
                }
            }

            let Some(session) = self.session.as_mut() else {
                continue;
            };

            match Self::write_line(&mut session.writer, line).await {
                Ok(()) => {
                    trace!("Sent to {}: {}", session.peer, line.trim_end());
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Write to APRS server {} failed (attempt {}): {}",
                        session.peer,
                        attempt + 1,
                        e
                    );
                    self.drop_session();
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("APRS send failed")))
    }

    /// Close the current session, if any
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = session.writer.shutdown().await;
            info!("Closed APRS session to {}", session.peer);
            metrics::gauge!("aprs.connection.connected").set(0.0);
        }
    }

    fn drop_session(&mut self) {
        if self.session.take().is_some() {
            metrics::gauge!("aprs.connection.connected").set(0.0);
        }
    }

    async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<()> {
        writer
            .write_all(line.as_bytes())
            .await
            .context("Failed to write to APRS server")?;
        writer
            .flush()
            .await
            .context("Failed to flush APRS server connection")?;
        Ok(())
    }

    /// Resolve, connect and log in
    #[tracing::instrument(skip(config), fields(server = %config.server, port = %config.port))]
    async fn connect(config: &AprsClientConfig) -> Result<Session> {
        let server_address = format!("{}:{}", config.server, config.port);

        let all_addrs: Vec<_> = tokio::net::lookup_host(&server_address)
            .await
            .with_context(|| format!("DNS resolution failed for {}", server_address))?
            .collect();
        if all_addrs.is_empty() {
            return Err(anyhow!(
                "DNS resolution returned no addresses for {}",
                server_address
            ));
        }

        let ipv4_addrs: Vec<_> = all_addrs.iter().filter(|a| a.is_ipv4()).cloned().collect();
        let mut candidates = if ipv4_addrs.is_empty() {
            debug!(
                "No IPv4 addresses found for {}, falling back to all addresses",
                server_address
            );
            all_addrs
        } else {
            ipv4_addrs
        };

        // Spread load across rotate.aprs2.net style round-robin hosts
        {
            use rand::seq::SliceRandom;
            let mut rng = rand::rng();
            candidates.shuffle(&mut rng);
        }

        let mut last_error = None;
        for addr in &candidates {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    info!("Connected to APRS server at {}", addr);
                    let session = Self::login(stream, config, addr.to_string()).await?;
                    metrics::counter!("aprs.connection.established_total").increment(1);
                    metrics::gauge!("aprs.connection.connected").set(1.0);
                    return Ok(session);
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(anyhow!(
            "Failed to connect to any resolved address for {}: {:?}",
            server_address,
            last_error
        ))
    }

    async fn login(stream: TcpStream, config: &AprsClientConfig, peer: String) -> Result<Session> {
        let (reader, mut writer) = stream.into_split();

        let login_cmd = Self::build_login_command(config);
        info!("Logging in to APRS server as {}", config.callsign);
        Self::write_line(&mut writer, &login_cmd)
            .await
            .context("Failed to send login command")?;

        let reader = tokio::spawn(Self::drain_server_lines(reader, peer.clone()));

        Ok(Session {
            writer,
            reader,
            peer,
        })
    }

    /// Read and log whatever the server sends until it closes the connection
    async fn drain_server_lines(reader: OwnedReadHalf, peer: String) {
        let mut buf_reader = BufReader::new(reader);
        let mut line_buffer = Vec::new();

        loop {
            line_buffer.clear();
            match buf_reader.read_until(b'\n', &mut line_buffer).await {
                Ok(0) => {
                    warn!("APRS server {} closed the connection", peer);
                    break;
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&line_buffer);
                    let line = line.trim();
                    if line.starts_with("# logresp") {
                        if line.contains("unverified") {
                            error!("APRS login not verified, packets will be dropped: {}", line);
                        } else {
                            info!("{}", line);
                        }
                    } else if !line.is_empty() {
                        trace!("Received: {}", line);
                    }
                }
                Err(e) => {
                    warn!("Error reading from APRS server {}: {}", peer, e);
                    break;
                }
            }
        }
    }

    /// Build the login command for APRS-IS authentication
    fn build_login_command(config: &AprsClientConfig) -> String {
        if config.software.is_empty() {
            return format!("user {} pass {}\n", config.callsign, config.passcode);
        }
        format!(
            "user {} pass {} vers {} {}\n",
            config.callsign, config.passcode, config.software, config.version
        )
    }
}

#[async_trait]
impl PacketSink for AprsClient {
    async fn send(&mut self, packet: &AprsPositionPacket) -> Result<()> {
        self.send_line(&packet.encode()).await
    }
}

/// Builder pattern for creating APRS client configurations
pub struct AprsClientConfigBuilder {
    config: AprsClientConfig,
}

impl AprsClientConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AprsClientConfig::default(),
        }
    }

    pub fn server<S: Into<String>>(mut self, server: S) -> Self {
        self.config.server = server.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn callsign<S: Into<String>>(mut self, callsign: S) -> Self {
        self.config.callsign = callsign.into();
        self
    }

    pub fn passcode<S: Into<String>>(mut self, passcode: S) -> Self {
        self.config.passcode = passcode.into();
        self
    }

    /// Drop the `vers` clause from the login line
    pub fn without_software_version(mut self) -> Self {
        self.config.software.clear();
        self.config.version.clear();
        self
    }

    pub fn build(self) -> AprsClientConfig {
        self.config
    }
}

impl Default for AprsClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
