use serde::{Deserialize, Serialize};

use crate::types::{FanMode, Mode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControlConfig {
    pub cycle_interval_ms: u64,
    pub status_refresh_ms: u64,
    pub startup_settle_ms: u64,
    pub command_delay_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 1_000,
            status_refresh_ms: 60_000,
            startup_settle_ms: 60_000,
            command_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThermostatSettings {
    #[serde(rename = "preferredTemperature")]
    pub preferred_temperature_f: f32,
    pub mode: Mode,
    #[serde(rename = "fanMode")]
    pub fan_mode: FanMode,
}

impl Default for ThermostatSettings {
    fn default() -> Self {
        Self {
            preferred_temperature_f: 70.0,
            mode: Mode::Off,
            fan_mode: FanMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UnitConfig {
    pub command_url: String,
    pub status_url: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            command_url: "http://127.0.0.1:8090/hvac".to_string(),
            status_url: "http://127.0.0.1:8090/status".to_string(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SensorConfig {
    pub w1_base_dir: String,
    /// Skips `28-*` discovery when set.
    pub device_file: Option<String>,
    pub retry_backoff_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            w1_base_dir: "/sys/bus/w1/devices".to_string(),
            device_file: None,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RpcConfig {
    pub port: u16,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { port: 4242 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub control: ControlConfig,
    pub unit: UnitConfig,
    pub sensor: SensorConfig,
    pub display: DisplayConfig,
    pub rpc: RpcConfig,
}

impl ControlConfig {
    /// The compressor guard and the hysteresis band are not configurable;
    /// see [`crate::thermostat::COMPRESSOR_GUARD_MS`].
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if self.cycle_interval_ms == 0 {
            self.cycle_interval_ms = defaults.cycle_interval_ms;
        }
        if self.status_refresh_ms == 0 {
            self.status_refresh_ms = defaults.status_refresh_ms;
        }
    }
}
