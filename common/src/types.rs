use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Off,
    Heat,
    Cool,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanMode {
    Auto,
    On,
}

impl FanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::On => "on",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl FromStr for Mode {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "heat" => Ok(Self::Heat),
            "cool" => Ok(Self::Cool),
            _ => Err(ParseEnumError {
                kind: "mode",
                value: value.to_string(),
            }),
        }
    }
}

impl FromStr for FanMode {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "on" => Ok(Self::On),
            _ => Err(ParseEnumError {
                kind: "fan mode",
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived every cycle from the observed unit state and the compressor guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlState {
    Idle,
    Cooling,
    Heating,
    Waiting,
}

impl ControlState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Cooling => "COOLING",
            Self::Heating => "HEATING",
            Self::Waiting => "WAITING",
        }
    }
}

/// Per-subsystem flags reported by the HVAC switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFlags {
    pub fan: bool,
    pub cool: bool,
    pub heat: bool,
}

impl UnitFlags {
    pub const OFF: Self = Self {
        fan: false,
        cool: false,
        heat: false,
    };

    /// Decodes `100 * heat + 10 * cool + fan`.
    ///
    /// Each digit is assumed to be 0 or 1; anything non-zero reads as on and
    /// out-of-range digits are not rejected.
    pub fn decode(code: i64) -> Self {
        let mut rest = code;
        let fan = rest % 10;
        rest /= 10;
        let cool = rest % 10;
        rest /= 10;
        let heat = rest;

        Self {
            fan: fan != 0,
            cool: cool != 0,
            heat: heat != 0,
        }
    }

    pub fn encode(self) -> i64 {
        i64::from(self.heat) * 100 + i64::from(self.cool) * 10 + i64::from(self.fan)
    }

    pub fn any_running(self) -> bool {
        self.fan || self.cool || self.heat
    }

    pub fn conditioning(self) -> bool {
        self.cool || self.heat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteUnitState {
    Known(UnitFlags),
    Unknown,
}

impl RemoteUnitState {
    pub fn flags(self) -> Option<UnitFlags> {
        match self {
            Self::Known(flags) => Some(flags),
            Self::Unknown => None,
        }
    }

    /// `Unknown` counts as nothing running.
    pub fn any_running(self) -> bool {
        self.flags().is_some_and(UnitFlags::any_running)
    }

    pub fn cooling(self) -> bool {
        self.flags().is_some_and(|flags| flags.cool)
    }

    pub fn heating(self) -> bool {
        self.flags().is_some_and(|flags| flags.heat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCommand {
    Off,
    Cool,
    Heat,
}

impl UnitCommand {
    /// Payload token understood by the switch.
    pub fn as_param(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Cool => "cool",
            Self::Heat => "heat",
        }
    }

    /// `return_value` the switch answers with when it accepts the command.
    pub fn ack_code(self) -> i64 {
        match self {
            Self::Off => -1,
            Self::Heat => 0,
            Self::Cool => 1,
        }
    }

    pub fn display_message(self) -> &'static str {
        match self {
            Self::Off => "Shutting Off",
            Self::Cool => "Starting AC",
            Self::Heat => "Starting Heater",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Accepted,
    Rejected,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp_f: Option<f32>,
    #[serde(rename = "preferredTemp")]
    pub preferred_temp_f: f32,
    pub mode: &'static str,
    #[serde(rename = "fanMode")]
    pub fan_mode: &'static str,
    pub state: &'static str,
    pub unit: Option<UnitFlags>,
    #[serde(rename = "guardActive")]
    pub guard_active: bool,
    #[serde(rename = "guardRemainingSec")]
    pub guard_remaining_sec: u64,
    pub cycles: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_heat_and_fan() {
        assert_eq!(
            UnitFlags::decode(101),
            UnitFlags {
                fan: true,
                cool: false,
                heat: true,
            }
        );
    }

    #[test]
    fn decodes_cooling_with_fan() {
        let flags = UnitFlags::decode(11);
        assert!(flags.fan);
        assert!(flags.cool);
        assert!(!flags.heat);
        assert_eq!(flags.encode(), 11);
    }

    #[test]
    fn zero_is_all_off() {
        assert_eq!(UnitFlags::decode(0), UnitFlags::OFF);
        assert!(!RemoteUnitState::Known(UnitFlags::OFF).any_running());
    }

    #[test]
    fn unknown_reports_nothing_running() {
        assert!(!RemoteUnitState::Unknown.any_running());
        assert!(!RemoteUnitState::Unknown.cooling());
        assert!(!RemoteUnitState::Unknown.heating());
    }

    #[test]
    fn ack_codes_match_switch_firmware() {
        assert_eq!(UnitCommand::Off.ack_code(), -1);
        assert_eq!(UnitCommand::Heat.ack_code(), 0);
        assert_eq!(UnitCommand::Cool.ack_code(), 1);
    }

    #[test]
    fn parses_modes_case_insensitively() {
        assert_eq!("COOL".parse::<Mode>(), Ok(Mode::Cool));
        assert_eq!(" heat ".parse::<Mode>(), Ok(Mode::Heat));
        assert_eq!("On".parse::<FanMode>(), Ok(FanMode::On));
        assert!("dry".parse::<Mode>().is_err());
    }
}
