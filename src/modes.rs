//! Robot and safety mode codes carried in realtime packets
//!
//! The realtime interface sends mode codes as doubles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Robot mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobotMode {
    NoController,
    Disconnected,
    ConfirmSafety,
    Booting,
    PowerOff,
    PowerOn,
    Idle,
    Backdrive,
    Running,
    UpdatingFirmware,
    Unknown(i32),
}

/// Robot mode name mappings
pub const ROBOT_MODE_NAMES: &[(i32, &str)] = &[
    (-1, "NO_CONTROLLER"),
    (0, "DISCONNECTED"),
    (1, "CONFIRM_SAFETY"),
    (2, "BOOTING"),
    (3, "POWER_OFF"),
    (4, "POWER_ON"),
    (5, "IDLE"),
    (6, "BACKDRIVE"),
    (7, "RUNNING"),
    (8, "UPDATING_FIRMWARE"),
];

impl RobotMode {
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => RobotMode::NoController,
            0 => RobotMode::Disconnected,
            1 => RobotMode::ConfirmSafety,
            2 => RobotMode::Booting,
            3 => RobotMode::PowerOff,
            4 => RobotMode::PowerOn,
            5 => RobotMode::Idle,
            6 => RobotMode::Backdrive,
            7 => RobotMode::Running,
            8 => RobotMode::UpdatingFirmware,
            other => RobotMode::Unknown(other),
        }
    }

    pub fn from_wire(value: f64) -> Self {
        Self::from_code(value as i32)
    }

    pub fn code(self) -> i32 {
        match self {
            RobotMode::NoController => -1,
            RobotMode::Disconnected => 0,
            RobotMode::ConfirmSafety => 1,
            RobotMode::Booting => 2,
            RobotMode::PowerOff => 3,
            RobotMode::PowerOn => 4,
            RobotMode::Idle => 5,
            RobotMode::Backdrive => 6,
            RobotMode::Running => 7,
            RobotMode::UpdatingFirmware => 8,
            RobotMode::Unknown(code) => code,
        }
    }

    pub fn name(self) -> String {
        lookup(ROBOT_MODE_NAMES, self.code())
    }
}

impl fmt::Display for RobotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Safety mode (firmware 3.3 / 3.4 numbering)
///
/// CB2 controllers have no safety mode field; a padded CB2 frame reads as
/// [`SafetyMode::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyMode {
    None,
    Normal,
    Reduced,
    ProtectiveStop,
    Recovery,
    SafeguardStop,
    SystemEmergencyStop,
    RobotEmergencyStop,
    Violation,
    Fault,
}

/// Safety mode name mappings
pub const SAFETY_MODE_NAMES: &[(i32, &str)] = &[
    (0, "NONE"),
    (1, "NORMAL"),
    (2, "REDUCED"),
    (3, "PROTECTIVE_STOP"),
    (4, "RECOVERY"),
    (5, "SAFEGUARD_STOP"),
    (6, "SYSTEM_EMERGENCY_STOP"),
    (7, "ROBOT_EMERGENCY_STOP"),
    (8, "VIOLATION"),
    (9, "FAULT"),
];

impl SafetyMode {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => SafetyMode::None,
            1 => SafetyMode::Normal,
            2 => SafetyMode::Reduced,
            3 => SafetyMode::ProtectiveStop,
            4 => SafetyMode::Recovery,
            5 => SafetyMode::SafeguardStop,
            6 => SafetyMode::SystemEmergencyStop,
            7 => SafetyMode::RobotEmergencyStop,
            8 => SafetyMode::Violation,
            9 => SafetyMode::Fault,
            _ => return None,
        })
    }

    pub fn from_wire(value: f64) -> Option<Self> {
        Self::from_code(value as i32)
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        SAFETY_MODE_NAMES[self as usize].1
    }

    /// Any stop state that halts motion
    pub fn is_stopped(self) -> bool {
        matches!(
            self,
            SafetyMode::ProtectiveStop
                | SafetyMode::SafeguardStop
                | SafetyMode::SystemEmergencyStop
                | SafetyMode::RobotEmergencyStop
                | SafetyMode::Violation
                | SafetyMode::Fault
        )
    }
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn lookup(table: &[(i32, &str)], code: i32) -> String {
    table
        .iter()
        .find(|(num, _)| *num == code)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("UNKNOWN({})", code))
}
