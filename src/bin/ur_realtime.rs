//! UR Realtime - stream decoded realtime packets as JSON
//!
//! Connects to the realtime (30003) and dashboard (29999) interfaces,
//! decodes every packet with the layout for the given firmware and prints
//! it as one JSON line. A monitor task reports the packet rate while the
//! receive loop runs.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use ur_realtime::{
    Config, ConsoleSink, FirmwareVersion, PacketEvent, PacketSink, ReadCounter, Session,
    SessionConfig, SessionStats,
};

const DEFAULT_CONFIG_PATH: &str = "config/realtime.yaml";

#[derive(Parser)]
#[command(name = "ur_realtime")]
#[command(about = "Universal Robots realtime interface client")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Controller address (overrides the configuration file)
    #[arg(long)]
    host: Option<String>,

    /// Controller firmware version, e.g. "1.8" or "3.10"
    #[arg(short, long)]
    firmware: Option<FirmwareVersion>,

    /// Print only this field of each packet
    #[arg(long)]
    field: Option<String>,

    /// Stop after this many packets
    #[arg(short = 'n', long)]
    count: Option<u64>,

    /// Seconds between packet rate reports
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Leave Nagle's algorithm enabled on both sockets
    #[arg(long)]
    keep_nagle: bool,
}

impl Args {
    fn get_config_path(&self) -> String {
        self.config
            .clone()
            .or_else(|| std::env::var("UR_REALTIME_CONFIG").ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Configuration file values with command line overrides applied
    fn session_config(&self) -> Result<SessionConfig> {
        let path = self.get_config_path();
        let explicit = self.config.is_some() || std::env::var("UR_REALTIME_CONFIG").is_ok();

        let mut session = if explicit || Path::new(&path).exists() {
            info!("Using config: {}", path);
            Config::load(&path)
                .with_context(|| format!("Failed to load {}", path))?
                .session_config()
        } else {
            let host = self
                .host
                .clone()
                .ok_or_else(|| anyhow!("No configuration file found, --host is required"))?;
            let firmware = self
                .firmware
                .ok_or_else(|| anyhow!("No configuration file found, --firmware is required"))?;
            SessionConfig::new(host, firmware)
        };

        if let Some(host) = &self.host {
            session.host = host.clone();
        }
        if let Some(firmware) = self.firmware {
            session.firmware = firmware;
        }
        if self.keep_nagle {
            session.disable_nagle = false;
        }

        Ok(session)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    info!("Universal Robots Realtime Client");
    info!("{}", "=".repeat(50));

    let session_config = args.session_config()?;
    info!("Robot: {} (firmware {})", session_config.host, session_config.firmware);

    // Connecting blocks on DNS, the TCP handshake and the settle delay
    let session = tokio::task::spawn_blocking(move || Session::with_config(session_config))
        .await
        .context("Connection task failed")?;
    let session = match session {
        Ok(session) => session,
        Err(e) => {
            error!("Connection failed: {}", e);
            error!("Make sure:");
            error!("   - Robot controller or URSim is running");
            error!("   - The host is reachable on ports 30003 and 29999");
            return Err(e.into());
        }
    };
    info!(
        "Connected, decoding {} byte packets ({})",
        session.layout().total_size(),
        session.layout().family().name()
    );

    let shutdown_signal = Arc::new(AtomicBool::new(false));

    let monitor_handle = {
        let counter = session.read_counter();
        let shutdown = Arc::clone(&shutdown_signal);
        let interval = Duration::from_secs(args.stats_interval.max(1));
        tokio::spawn(async move { run_rate_monitor(counter, shutdown, interval).await })
    };

    let sink: Box<dyn PacketSink> = if args.pretty {
        Box::new(ConsoleSink::pretty())
    } else {
        Box::new(ConsoleSink::new())
    };

    let mut receive_handle = {
        let shutdown = Arc::clone(&shutdown_signal);
        let field = args.field.clone();
        let count = args.count;
        tokio::task::spawn_blocking(move || run_receive_loop(session, sink, field, count, shutdown))
    };

    let outcome = tokio::select! {
        result = &mut receive_handle => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping receive loop");
            shutdown_signal.store(true, Ordering::Relaxed);
            receive_handle.await
        }
    };

    shutdown_signal.store(true, Ordering::Relaxed);
    monitor_handle.abort();

    let stats = outcome.context("Receive loop panicked")??;
    info!(
        "Stopped after {} packets ({} hiccups, {} incomplete, {} reconnects)",
        stats.reads, stats.hiccups, stats.incomplete_packets, stats.reconnects
    );
    Ok(())
}

/// Blocking receive loop. Returns the final session statistics.
fn run_receive_loop(
    mut session: Session,
    mut sink: Box<dyn PacketSink>,
    field: Option<String>,
    count: Option<u64>,
    shutdown_signal: Arc<AtomicBool>,
) -> Result<SessionStats> {
    let mut sequence = 0u64;
    let mut missing_field_reported = false;

    while !shutdown_signal.load(Ordering::Relaxed) {
        let packet = match session.receive()? {
            Some(packet) => packet,
            None => continue,
        };
        sequence += 1;

        match field.as_deref() {
            Some(name) => match PacketEvent::field(&packet, name, sequence) {
                Some(event) => sink.publish(&event)?,
                None if !missing_field_reported => {
                    warn!("Field '{}' is not part of the {} layout", name, packet.family().name());
                    missing_field_reported = true;
                }
                None => {}
            },
            None => sink.publish(&PacketEvent::packet(&packet, sequence))?,
        }

        if count.is_some_and(|limit| sequence >= limit) {
            break;
        }
    }

    let stats = session.stats();
    sink.publish_stats(&stats)?;
    Ok(stats)
}

/// Periodically report the packet rate from the shared read counter
async fn run_rate_monitor(
    counter: ReadCounter,
    shutdown_signal: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    let mut last_count = counter.get();
    let mut last_time = Instant::now();

    while !shutdown_signal.load(Ordering::Relaxed) {
        ticker.tick().await;

        let count = counter.get();
        let now = Instant::now();
        let rate = (count - last_count) as f64 / now.duration_since(last_time).as_secs_f64();
        info!("Received {} packets ({:.1} Hz)", count, rate);

        last_count = count;
        last_time = now;
    }
}
