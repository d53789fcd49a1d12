//! Error types for UR realtime operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, URError>;

#[derive(Error, Debug)]
pub enum URError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Invalid firmware version: {0}")]
    InvalidFirmware(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl URError {
    /// Whether the session recovers from this error by reconnecting.
    ///
    /// Read failures and undecodable frames are handled inside
    /// [`Session::receive`](crate::Session::receive); everything else is
    /// returned to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, URError::Io(_) | URError::MalformedPacket(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let io = URError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
        assert!(io.is_recoverable());
        assert!(URError::MalformedPacket("short".to_string()).is_recoverable());

        assert!(!URError::Connection("refused".to_string()).is_recoverable());
        assert!(!URError::Config("bad".to_string()).is_recoverable());
        assert!(!URError::InvalidFirmware("x".to_string()).is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        let err = URError::Connection("no address for robot:30003".to_string());
        assert_eq!(err.to_string(), "Connection failed: no address for robot:30003");

        let err = URError::MalformedPacket("non-finite value in field 'time'".to_string());
        assert_eq!(err.to_string(), "Malformed packet: non-finite value in field 'time'");
    }
}
