//! Realtime session: connection lifecycle and receive loop
//!
//! A [`Session`] owns one connection to the realtime interface and one to
//! the dashboard server. The caller drives it by calling
//! [`Session::receive`] in a loop; there is no background reader.
//!
//! ```text
//!   Connected --receive()--> Receiving --packet / timeout--> Connected
//!                                |
//!                          I/O or decode error
//!                                v
//!                          Reconnecting --both sockets reopened--> Connected
//! ```
//!
//! Any read or decode failure closes *both* connections and reopens them,
//! even though the dashboard socket is never read. The call that hit the
//! failure returns `Ok(None)`; the next call reads from the new connection.

use serde::Serialize;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::connection::{
    is_timeout, read_frame, Connection, Connector, Endpoint, SocketOptions, TcpConnector,
    UR_DASHBOARD_PORT, UR_REALTIME_PORT,
};
use crate::layout::{LayoutRegistry, PacketLayout};
use crate::packet::{decode, pad_frame, DecodedPacket};
use crate::version::FirmwareVersion;
use crate::{Result, URError};

/// Controller cycle time of the realtime interface (125 Hz)
pub const PACKET_PERIOD: Duration = Duration::from_millis(8);

/// A gap longer than this between two packets is reported as a hiccup
pub const HICCUP_THRESHOLD: Duration = Duration::from_micros(8_800);

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Pause after the initial connect before timing starts
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Runtime parameters of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub host: String,
    pub firmware: FirmwareVersion,
    pub disable_nagle: bool,
    pub realtime_port: u16,
    pub dashboard_port: u16,
    /// Bound on reading one realtime frame
    pub read_timeout: Duration,
    /// Treat a read timeout with no data as a stream failure
    pub reconnect_on_timeout: bool,
    pub settle_delay: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, firmware: FirmwareVersion) -> Self {
        Self {
            host: host.into(),
            firmware,
            disable_nagle: true,
            realtime_port: UR_REALTIME_PORT,
            dashboard_port: UR_DASHBOARD_PORT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            reconnect_on_timeout: false,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn realtime_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.realtime_port)
    }

    pub fn dashboard_endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.dashboard_port)
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(URError::Config("host must not be empty".to_string()));
        }
        if self.read_timeout.is_zero() {
            return Err(URError::Config("read timeout must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connected,
    Receiving,
    Reconnecting,
}

/// Count of decoded packets, shareable with a monitor on another thread
#[derive(Debug, Clone, Default)]
pub struct ReadCounter {
    count: Arc<Mutex<u64>>,
}

impl ReadCounter {
    pub fn get(&self) -> u64 {
        match self.count.lock() {
            Ok(count) => *count,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn increment(&self) {
        let mut count = match self.count.lock() {
            Ok(count) => count,
            Err(poisoned) => poisoned.into_inner(),
        };
        *count += 1;
    }
}

/// Gap between two packets that exceeded [`HICCUP_THRESHOLD`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hiccup {
    /// Time since the session started
    pub elapsed: Duration,
    /// Time since the previous packet
    pub gap: Duration,
}

impl Hiccup {
    /// Delay beyond one controller cycle, in milliseconds
    pub fn overhead_ms(&self) -> f64 {
        (self.gap.as_secs_f64() - PACKET_PERIOD.as_secs_f64()) * 1000.0
    }
}

/// Receive timestamps of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    start: Instant,
    last_recv: Instant,
    prev_recv: Instant,
}

impl SessionTiming {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            last_recv: start,
            prev_recv: start,
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn last_recv(&self) -> Instant {
        self.last_recv
    }

    pub fn prev_recv(&self) -> Instant {
        self.prev_recv
    }

    /// Record the arrival time of a frame
    pub fn mark_received(&mut self, now: Instant) {
        self.last_recv = now;
    }

    /// Hiccup between the previous decoded packet and the last frame, if any
    pub fn hiccup(&self) -> Option<Hiccup> {
        let gap = self.last_recv.saturating_duration_since(self.prev_recv);
        (gap > HICCUP_THRESHOLD).then(|| Hiccup {
            elapsed: self.last_recv.saturating_duration_since(self.start),
            gap,
        })
    }

    /// The last frame decoded; it becomes the reference for the next gap
    pub fn commit(&mut self) {
        self.prev_recv = self.last_recv;
    }
}

/// Counters describing the stream so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub reads: u64,
    pub hiccups: u64,
    pub incomplete_packets: u64,
    pub reconnects: u64,
}

/// Realtime interface session
pub struct Session<C: Connector = TcpConnector> {
    config: SessionConfig,
    connector: C,
    registry: Arc<LayoutRegistry>,
    telemetry: Option<Connection<C::Stream>>,
    dashboard: Option<Connection<C::Stream>>,
    phase: SessionPhase,
    timing: SessionTiming,
    reads: ReadCounter,
    hiccups: u64,
    incomplete_packets: u64,
    reconnects: u64,
}

impl Session<TcpConnector> {
    /// Connect to a controller with default ports and timeouts.
    pub fn connect(host: &str, firmware: FirmwareVersion, disable_nagle: bool) -> Result<Self> {
        let mut config = SessionConfig::new(host, firmware);
        config.disable_nagle = disable_nagle;
        Self::with_config(config)
    }

    pub fn with_config(config: SessionConfig) -> Result<Self> {
        Self::with_connector(config, TcpConnector, LayoutRegistry::shared())
    }
}

impl<C: Connector> Session<C> {
    /// Open both connections through `connector` and start timing.
    pub fn with_connector(
        config: SessionConfig,
        connector: C,
        registry: Arc<LayoutRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let layout = registry.resolve(config.firmware);
        info!(
            host = %config.host,
            firmware = %config.firmware,
            layout = layout.family().name(),
            packet_size = layout.total_size(),
            "Connecting to UR realtime interface"
        );

        let (telemetry, dashboard) = open_connections(&connector, &config)?;

        if !config.settle_delay.is_zero() {
            std::thread::sleep(config.settle_delay);
        }

        let timing = SessionTiming::new(Instant::now());
        debug!(host = %config.host, "Realtime session started");

        Ok(Self {
            config,
            connector,
            registry,
            telemetry: Some(telemetry),
            dashboard: Some(dashboard),
            phase: SessionPhase::Connected,
            timing,
            reads: ReadCounter::default(),
            hiccups: 0,
            incomplete_packets: 0,
            reconnects: 0,
        })
    }

    /// Read and decode the next realtime packet.
    ///
    /// Returns `Ok(None)` when no data arrived within the read timeout, or
    /// when the stream failed and both connections were reopened. Errors
    /// other than read and decode failures are returned, as is a failed
    /// reconnect.
    pub fn receive(&mut self) -> Result<Option<DecodedPacket>> {
        self.phase = SessionPhase::Receiving;

        match self.receive_packet() {
            Ok(packet) => {
                self.phase = SessionPhase::Connected;
                Ok(packet)
            }
            Err(e) if e.is_recoverable() => {
                warn!(host = %self.config.host, error = %e, "Realtime stream failed, reconnecting");
                self.reconnect()?;
                Ok(None)
            }
            Err(e) => {
                self.phase = SessionPhase::Connected;
                Err(e)
            }
        }
    }

    fn receive_packet(&mut self) -> Result<Option<DecodedPacket>> {
        let registry = Arc::clone(&self.registry);
        let layout = registry.resolve(self.config.firmware);
        let size = layout.total_size();

        let telemetry = self.telemetry.as_mut().ok_or_else(|| {
            let closed =
                io::Error::new(io::ErrorKind::NotConnected, "realtime connection is closed");
            URError::Io(closed)
        })?;

        let timeout = self.config.read_timeout;
        let mut buf = vec![0u8; size];
        let received = match read_frame(telemetry.stream_mut(), &mut buf, Some(timeout)) {
            Ok(n) => n,
            Err(e) if is_timeout(&e) && !self.config.reconnect_on_timeout => {
                debug!(timeout_ms = timeout.as_millis() as u64, "No realtime data");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.timing.mark_received(Instant::now());

        let frame = pad_frame(&buf[..received], size);
        self.check_frame(received, size);

        let packet = decode(&frame, layout)?;

        self.timing.commit();
        self.reads.increment();
        Ok(Some(packet))
    }

    /// Timing and completeness checks. Neither fails the read.
    fn check_frame(&mut self, received: usize, expected: usize) {
        if let Some(hiccup) = self.timing.hiccup() {
            self.hiccups += 1;
            debug!(
                elapsed_s = hiccup.elapsed.as_secs_f64(),
                overhead_ms = hiccup.overhead_ms(),
                "Hiccup of {:.2}ms overhead between UR packets",
                hiccup.overhead_ms()
            );
        }

        if received != expected {
            self.incomplete_packets += 1;
            warn!(received, expected, "Incomplete packet from UR");
        }
    }

    /// Close both connections and open new ones.
    fn reconnect(&mut self) -> Result<()> {
        self.phase = SessionPhase::Reconnecting;

        if let Some(connection) = self.telemetry.take() {
            connection.close();
        }
        if let Some(connection) = self.dashboard.take() {
            connection.close();
        }

        match open_connections(&self.connector, &self.config) {
            Ok((telemetry, dashboard)) => {
                self.telemetry = Some(telemetry);
                self.dashboard = Some(dashboard);
                self.reconnects += 1;
                self.phase = SessionPhase::Connected;
                info!(
                    host = %self.config.host,
                    reconnects = self.reconnects,
                    "Reconnected to UR controller"
                );
                Ok(())
            }
            Err(e) => {
                error!(host = %self.config.host, error = %e, "Reconnection failed");
                Err(e)
            }
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.telemetry.is_some() && self.dashboard.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Layout used for this session's firmware
    pub fn layout(&self) -> &PacketLayout {
        self.registry.resolve(self.config.firmware)
    }

    pub fn timing(&self) -> &SessionTiming {
        &self.timing
    }

    pub fn read_count(&self) -> u64 {
        self.reads.get()
    }

    /// Handle for reading the packet count from another thread
    pub fn read_counter(&self) -> ReadCounter {
        self.reads.clone()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            reads: self.reads.get(),
            hiccups: self.hiccups,
            incomplete_packets: self.incomplete_packets,
            reconnects: self.reconnects,
        }
    }
}

/// Realtime first, then dashboard. If the dashboard fails the realtime
/// connection is dropped with it.
fn open_connections<C: Connector>(
    connector: &C,
    config: &SessionConfig,
) -> Result<(Connection<C::Stream>, Connection<C::Stream>)> {
    let realtime_options = SocketOptions {
        nodelay: config.disable_nagle,
        read_timeout: Some(config.read_timeout),
    };
    let dashboard_options = SocketOptions {
        nodelay: config.disable_nagle,
        read_timeout: None,
    };

    let telemetry = Connection::open(connector, config.realtime_endpoint(), &realtime_options)?;
    debug!(endpoint = %telemetry.endpoint(), "Realtime connection open");
    let dashboard = Connection::open(connector, config.dashboard_endpoint(), &dashboard_options)?;
    debug!(endpoint = %dashboard.endpoint(), "Dashboard connection open");

    Ok((telemetry, dashboard))
}
