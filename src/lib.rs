//! UR Realtime - Universal Robots realtime interface client
//!
//! Reads the fixed-rate binary stream the controller publishes on port
//! 30003, decodes it with the layout matching the controller firmware, and
//! keeps the connection alive across network failures.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ur_realtime::Session;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::connect("10.224.60.30", "1.8".parse()?, true)?;
//!
//!     loop {
//!         if let Some(packet) = session.receive()? {
//!             println!("{:?}", packet.vector("tool_vector"));
//!         }
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - **LayoutRegistry**: firmware version to packet layout
//! - **decode**: raw frame to [`DecodedPacket`]
//! - **Connector**: TCP connection setup (`TCP_NODELAY`, read timeout)
//! - **Session**: receive loop, timing checks, reconnection
//! - **PacketSink**: transport-agnostic output of decoded packets

pub mod config;
pub mod connection;
pub mod error;
pub mod layout;
pub mod modes;
pub mod packet;
pub mod session;
pub mod telemetry;
pub mod version;

pub use config::{Config, ConnectionConfig, PortConfig, RobotConfig};
pub use connection::{
    connect, read_frame, Connection, Connector, Endpoint, ReadStream, SocketOptions, TcpConnector,
    UR_DASHBOARD_PORT, UR_PRIMARY_PORT, UR_REALTIME_PORT, UR_RTDE_PORT, UR_SECONDARY_PORT,
};
pub use error::{Result, URError};
pub use layout::{ByteOrder, ElementType, FieldSpec, LayoutFamily, LayoutRegistry, PacketLayout};
pub use modes::{RobotMode, SafetyMode};
pub use packet::{decode, pad_frame, DecodedPacket, FieldValue};
pub use session::{ReadCounter, Session, SessionConfig, SessionPhase, SessionStats, SessionTiming};
pub use telemetry::{ConsoleSink, NoOpSink, PacketEvent, PacketSink};
pub use version::FirmwareVersion;
