pub mod config;
pub mod thermostat;
pub mod types;

pub use config::{
    ControlConfig, DisplayConfig, RpcConfig, RuntimeConfig, SensorConfig, ThermostatSettings,
    UnitConfig,
};
pub use thermostat::{
    transition, CycleInputs, EngineAction, ThermostatEngine, Transition, COMPRESSOR_GUARD_MS,
    HYSTERESIS_F,
};
pub use types::{
    CommandOutcome, ControlState, ControllerStatus, FanMode, Mode, ParseEnumError,
    RemoteUnitState, UnitCommand, UnitFlags,
};
