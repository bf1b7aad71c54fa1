use crate::{
    config::{ControlConfig, ThermostatSettings},
    types::{
        CommandOutcome, ControlState, ControllerStatus, Mode, RemoteUnitState, UnitCommand,
        UnitFlags,
    },
};

/// Minimum off time after an accepted shutdown before any restart.
pub const COMPRESSOR_GUARD_MS: u64 = 300_000;

/// Half-width of the band around the preferred temperature, in °F.
pub const HYSTERESIS_F: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineAction {
    StartCooling,
    StartHeating,
    ShutDown,
    /// Guard is active but the unit still reports something running.
    ReissueShutDown,
    Wait { remaining_ms: u64 },
    NoOp,
}

impl EngineAction {
    pub fn command(self) -> Option<UnitCommand> {
        match self {
            Self::StartCooling => Some(UnitCommand::Cool),
            Self::StartHeating => Some(UnitCommand::Heat),
            Self::ShutDown | Self::ReissueShutDown => Some(UnitCommand::Off),
            Self::Wait { .. } | Self::NoOp => None,
        }
    }
}

/// Everything one decision needs. Built fresh each cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleInputs {
    pub temperature_f: f32,
    pub preferred_f: f32,
    pub mode: Mode,
    pub hysteresis_f: f32,
    pub unit: RemoteUnitState,
    /// Most recent `Known` snapshot, used only while `unit` is `Unknown`.
    pub last_known: Option<UnitFlags>,
    pub guard_remaining_ms: u64,
}

impl CycleInputs {
    fn cooling_demanded(&self) -> bool {
        self.mode == Mode::Cool && self.temperature_f >= self.preferred_f - self.hysteresis_f
    }

    fn heating_demanded(&self) -> bool {
        self.mode == Mode::Heat && self.temperature_f <= self.preferred_f + self.hysteresis_f
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: ControlState,
    pub to: ControlState,
    pub action: EngineAction,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Pure decision step: no clock, no I/O.
pub fn transition(state: ControlState, inputs: &CycleInputs) -> Transition {
    let (to, action) = decide(inputs);
    Transition {
        from: state,
        to,
        action,
    }
}

fn decide(inputs: &CycleInputs) -> (ControlState, EngineAction) {
    if inputs.guard_remaining_ms > 0 {
        if inputs.unit.any_running() {
            return (ControlState::Waiting, EngineAction::ReissueShutDown);
        }
        return (
            ControlState::Waiting,
            EngineAction::Wait {
                remaining_ms: inputs.guard_remaining_ms,
            },
        );
    }

    let cooling = inputs.cooling_demanded();
    let heating = inputs.heating_demanded();

    match inputs.unit {
        RemoteUnitState::Known(flags) => {
            if cooling {
                if flags.cool {
                    (ControlState::Cooling, EngineAction::NoOp)
                } else {
                    (ControlState::Cooling, EngineAction::StartCooling)
                }
            } else if heating {
                if flags.heat {
                    (ControlState::Heating, EngineAction::NoOp)
                } else {
                    (ControlState::Heating, EngineAction::StartHeating)
                }
            } else if flags.conditioning() {
                (ControlState::Idle, EngineAction::ShutDown)
            } else {
                (ControlState::Idle, EngineAction::NoOp)
            }
        }
        // Never start blind; shut down only if the last real observation
        // showed something the current mode no longer wants.
        RemoteUnitState::Unknown => {
            let last = inputs.last_known.unwrap_or(UnitFlags::OFF);
            if cooling && last.cool {
                (ControlState::Cooling, EngineAction::NoOp)
            } else if heating && last.heat {
                (ControlState::Heating, EngineAction::NoOp)
            } else if last.conditioning() {
                (ControlState::Idle, EngineAction::ShutDown)
            } else {
                (ControlState::Idle, EngineAction::NoOp)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThermostatEngine {
    pub config: ControlConfig,

    state: ControlState,
    current_temp_f: Option<f32>,

    unit: RemoteUnitState,
    last_known: Option<UnitFlags>,
    last_refresh_ms: Option<u64>,
    refresh_requested: bool,

    guard_until_ms: Option<u64>,
    cycles: u64,
}

impl ThermostatEngine {
    pub fn new(mut config: ControlConfig) -> Self {
        config.sanitize();
        Self {
            config,
            state: ControlState::Idle,
            current_temp_f: None,
            unit: RemoteUnitState::Unknown,
            last_known: None,
            last_refresh_ms: None,
            refresh_requested: false,
            guard_until_ms: None,
            cycles: 0,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn unit(&self) -> RemoteUnitState {
        self.unit
    }

    pub fn current_temp_f(&self) -> Option<f32> {
        self.current_temp_f
    }

    pub fn update_temperature(&mut self, temp_f: f32) {
        self.current_temp_f = Some(temp_f);
    }

    pub fn status_refresh_due(&self, now_ms: u64) -> bool {
        if self.refresh_requested {
            return true;
        }
        self.last_refresh_ms
            .map(|last| now_ms.saturating_sub(last) >= self.config.status_refresh_ms)
            .unwrap_or(true)
    }

    pub fn observe_unit(&mut self, unit: RemoteUnitState, now_ms: u64) {
        self.unit = unit;
        if let RemoteUnitState::Known(flags) = unit {
            self.last_known = Some(flags);
        }
        self.last_refresh_ms = Some(now_ms);
        self.refresh_requested = false;
    }

    pub fn is_guard_active(&self, now_ms: u64) -> bool {
        self.guard_remaining_ms(now_ms) > 0
    }

    pub fn guard_remaining_ms(&self, now_ms: u64) -> u64 {
        self.guard_until_ms
            .map(|until| until.saturating_sub(now_ms))
            .unwrap_or(0)
    }

    pub fn guard_until_ms(&self) -> Option<u64> {
        self.guard_until_ms
    }

    /// Runs one decision against a copy of the current settings.
    ///
    /// Returns the transition; the caller executes `action.command()` and
    /// reports back through [`Self::record_outcome`].
    pub fn tick(&mut self, settings: &ThermostatSettings, now_ms: u64) -> Transition {
        self.expire_guard_if_needed(now_ms);
        self.cycles = self.cycles.saturating_add(1);

        let Some(temperature_f) = self.current_temp_f else {
            return Transition {
                from: self.state,
                to: self.state,
                action: EngineAction::NoOp,
            };
        };

        let inputs = CycleInputs {
            temperature_f,
            preferred_f: settings.preferred_temperature_f,
            mode: settings.mode,
            hysteresis_f: HYSTERESIS_F,
            unit: self.unit,
            last_known: self.last_known,
            guard_remaining_ms: self.guard_remaining_ms(now_ms),
        };

        let transition = transition(self.state, &inputs);
        self.state = transition.to;
        transition
    }

    /// Applies what the switch said about a command.
    ///
    /// Only an accepted shutdown arms the guard, and not when the unit was
    /// last observed with everything off. Any accepted command makes the next
    /// cycle re-query the unit.
    pub fn record_outcome(&mut self, command: UnitCommand, outcome: CommandOutcome, now_ms: u64) {
        if outcome != CommandOutcome::Accepted {
            return;
        }

        self.refresh_requested = true;

        if command == UnitCommand::Off {
            let observed_idle = matches!(self.unit, RemoteUnitState::Known(flags) if !flags.any_running());
            if !observed_idle {
                self.guard_until_ms = Some(now_ms.saturating_add(COMPRESSOR_GUARD_MS));
                self.state = ControlState::Waiting;
            }
            self.last_known = None;
        }
    }

    pub fn status(&self, settings: &ThermostatSettings, now_ms: u64) -> ControllerStatus {
        ControllerStatus {
            current_temp_f: self.current_temp_f,
            preferred_temp_f: settings.preferred_temperature_f,
            mode: settings.mode.as_str(),
            fan_mode: settings.fan_mode.as_str(),
            state: self.state.as_str(),
            unit: self.unit.flags(),
            guard_active: self.is_guard_active(now_ms),
            guard_remaining_sec: self.guard_remaining_ms(now_ms) / 1_000,
            cycles: self.cycles,
        }
    }

    fn expire_guard_if_needed(&mut self, now_ms: u64) {
        if let Some(until) = self.guard_until_ms {
            if now_ms >= until {
                self.guard_until_ms = None;
                if self.state == ControlState::Waiting {
                    self.state = ControlState::Idle;
                }
            }
        }
    }
}
