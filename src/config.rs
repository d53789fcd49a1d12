//! Configuration loading for the realtime client

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::connection::{UR_DASHBOARD_PORT, UR_REALTIME_PORT};
use crate::session::SessionConfig;
use crate::version::FirmwareVersion;
use crate::{Result, URError};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub robot: RobotConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RobotConfig {
    pub host: String,
    /// Quote it: an unquoted `3.10` is read as the number 3.1
    pub firmware_version: FirmwareVersion,
    #[serde(default)]
    pub ports: PortConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PortConfig {
    pub realtime: u16,
    pub dashboard: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            realtime: UR_REALTIME_PORT,
            dashboard: UR_DASHBOARD_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub disable_nagle: bool,
    pub read_timeout_ms: u64,
    pub reconnect_on_timeout: bool,
    pub settle_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            disable_nagle: true,
            read_timeout_ms: 200,
            reconnect_on_timeout: false,
            settle_delay_ms: 500,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| URError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.robot.host.trim().is_empty() {
            return Err(URError::Config("robot.host must not be empty".to_string()));
        }
        if self.connection.read_timeout_ms == 0 {
            return Err(URError::Config(
                "connection.read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Runtime session parameters
    pub fn session_config(&self) -> SessionConfig {
        let mut session = SessionConfig::new(self.robot.host.clone(), self.robot.firmware_version);
        session.realtime_port = self.robot.ports.realtime;
        session.dashboard_port = self.robot.ports.dashboard;
        session.disable_nagle = self.connection.disable_nagle;
        session.read_timeout = Duration::from_millis(self.connection.read_timeout_ms);
        session.reconnect_on_timeout = self.connection.reconnect_on_timeout;
        session.settle_delay = Duration::from_millis(self.connection.settle_delay_ms);
        session
    }
}
