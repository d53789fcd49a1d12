//! Controller firmware version
//!
//! Versions compare as `(major, minor)` integer pairs, so `3.10` sorts after
//! `3.9`. A version read from a YAML number has already lost that
//! distinction (`3.10` parses as `3.1`), so configuration files should quote
//! it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::URError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawVersion", into = "String")]
pub struct FirmwareVersion {
    pub major: i32,
    pub minor: i32,
}

impl FirmwareVersion {
    pub const fn new(major: i32, minor: i32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for FirmwareVersion {
    type Err = URError;

    /// Parse `"major.minor"`; further components (`"5.11.1"`) are ignored
    /// and a bare major (`"3"`) means minor 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut parts = trimmed.split('.');

        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| URError::InvalidFirmware(format!("empty version '{}'", s)))?
            .parse::<i32>()
            .map_err(|e| URError::InvalidFirmware(format!("'{}': {}", s, e)))?;

        let minor = match parts.next() {
            Some(p) => p
                .parse::<i32>()
                .map_err(|e| URError::InvalidFirmware(format!("'{}': {}", s, e)))?,
            None => 0,
        };

        Ok(Self { major, minor })
    }
}

impl From<FirmwareVersion> for String {
    fn from(version: FirmwareVersion) -> Self {
        version.to_string()
    }
}

/// Accepts both `firmware_version: "3.10"` and `firmware_version: 1.8`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawVersion {
    Text(String),
    Number(f64),
}

impl TryFrom<RawVersion> for FirmwareVersion {
    type Error = URError;

    fn try_from(raw: RawVersion) -> Result<Self, Self::Error> {
        match raw {
            RawVersion::Text(text) => text.parse(),
            RawVersion::Number(number) if number.is_finite() => number.to_string().parse(),
            RawVersion::Number(number) => {
                Err(URError::InvalidFirmware(format!("non-finite version {}", number)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major_minor() {
        assert_eq!("1.8".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(1, 8));
        assert_eq!("3.10".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(3, 10));
        assert_eq!(" 5.4 ".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(5, 4));
        assert_eq!("5.11.1".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(5, 11));
        assert_eq!("3".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(3, 0));
        assert_eq!("-1.0".parse::<FirmwareVersion>().unwrap(), FirmwareVersion::new(-1, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<FirmwareVersion>().is_err());
        assert!("abc".parse::<FirmwareVersion>().is_err());
        assert!("3.x".parse::<FirmwareVersion>().is_err());
    }

    #[test]
    fn test_ordering_is_numeric_per_component() {
        assert!(FirmwareVersion::new(3, 10) > FirmwareVersion::new(3, 9));
        assert!(FirmwareVersion::new(5, 0) > FirmwareVersion::new(3, 10));
        assert!(FirmwareVersion::new(1, 8) < FirmwareVersion::new(3, 0));
    }

    #[test]
    fn test_deserialize_string_and_number() {
        let quoted: FirmwareVersion = serde_yaml::from_str("\"3.10\"").unwrap();
        assert_eq!(quoted, FirmwareVersion::new(3, 10));

        let number: FirmwareVersion = serde_yaml::from_str("1.8").unwrap();
        assert_eq!(number, FirmwareVersion::new(1, 8));

        // Unquoted 3.10 is the float 3.1
        let lossy: FirmwareVersion = serde_yaml::from_str("3.10").unwrap();
        assert_eq!(lossy, FirmwareVersion::new(3, 1));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let version = FirmwareVersion::new(3, 10);
        assert_eq!(version.to_string(), "3.10");
    }
}
