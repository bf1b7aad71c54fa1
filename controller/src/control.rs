use std::{
    convert::Infallible,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use chrono::Local;
use thiserror::Error;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{error, info, warn};

use thermostat_common::{
    CommandOutcome, ControlConfig, ControllerStatus, EngineAction, RemoteUnitState,
    ThermostatEngine, Transition, UnitCommand,
};
use thermostat_sensor::SensorPort;

use crate::{
    display::{DisplayPort, Tone},
    store::SettingsStore,
    unit::RemoteUnit,
};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("status subscribers are gone; settings service has stopped")]
    StatusChannelClosed,
}

pub type StatusSender = watch::Sender<Option<ControllerStatus>>;

/// Millisecond clock. Read after every call that can block, so deadlines are
/// measured from when the switch actually answered.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct ControlLoop<S, R: ?Sized, D> {
    engine: ThermostatEngine,
    clock: Clock,
    store: SettingsStore,
    sensor: S,
    unit: Arc<R>,
    display: D,
    status: StatusSender,
}

impl<S, R, D> ControlLoop<S, R, D>
where
    S: SensorPort,
    R: RemoteUnit + ?Sized,
    D: DisplayPort,
{
    pub fn new(
        config: ControlConfig,
        store: SettingsStore,
        sensor: S,
        unit: Arc<R>,
        display: D,
        status: StatusSender,
    ) -> Self {
        Self {
            engine: ThermostatEngine::new(config),
            clock: Arc::new(monotonic_ms),
            store,
            sensor,
            unit,
            display,
            status,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now_ms(&self) -> u64 {
        (self.clock)()
    }

    pub async fn run(mut self) -> Result<Infallible, ControlError> {
        self.startup().await;

        let settle = Duration::from_millis(self.engine.config.startup_settle_ms);
        info!("waiting {}s for the unit to settle", settle.as_secs());
        tokio::time::sleep(settle).await;

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.engine.config.cycle_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.run_cycle().await?;
        }
    }

    /// Observes the unit and sends an unconditional shutdown. Never fails.
    pub async fn startup(&mut self) {
        self.display.show_message("Starting up", Tone::Neutral);
        info!("Starting up");

        let observed = self.unit.query_state().await;
        match observed {
            RemoteUnitState::Known(flags) => info!("unit reports {flags:?} at startup"),
            RemoteUnitState::Unknown => warn!("unable to get unit status at startup"),
        }
        self.engine.observe_unit(observed, self.now_ms());

        let outcome = self.unit.command(UnitCommand::Off).await;
        self.engine
            .record_outcome(UnitCommand::Off, outcome, self.now_ms());
        match outcome {
            CommandOutcome::Accepted => info!("startup shutdown acknowledged"),
            CommandOutcome::Rejected => error!("unable to shut off unit at startup"),
            CommandOutcome::Unknown => warn!("unit unreachable at startup, continuing"),
        }
    }

    pub async fn run_cycle(&mut self) -> Result<Transition, ControlError> {
        let temperature_f = self.sensor.read_fahrenheit().await;
        self.engine.update_temperature(temperature_f);

        if self.engine.status_refresh_due(self.now_ms()) {
            let observed = self.unit.query_state().await;
            self.engine.observe_unit(observed, self.now_ms());
        }

        let settings = self.store.snapshot().await;
        let transition = self.engine.tick(&settings, self.now_ms());
        if transition.changed() {
            info!(
                "state {} -> {} at {temperature_f:.2}°F (preferred {:.1}°F, mode {})",
                transition.from.as_str(),
                transition.to.as_str(),
                settings.preferred_temperature_f,
                settings.mode
            );
        }

        match transition.action {
            EngineAction::Wait { remaining_ms } => {
                info!(
                    "compressor guard: {:.2} minutes remaining",
                    remaining_ms as f64 / 60_000.0
                );
            }
            EngineAction::ReissueShutDown => {
                error!("system has not shut down yet: {:?}", self.engine.unit());
            }
            _ => {}
        }

        if let Some(command) = transition.action.command() {
            self.execute(command).await;
        }

        self.display.show_temperature(temperature_f);

        self.status
            .send(Some(self.engine.status(&settings, self.now_ms())))
            .map_err(|_| ControlError::StatusChannelClosed)?;

        Ok(transition)
    }

    async fn execute(&mut self, command: UnitCommand) {
        let message = command.display_message();
        self.display.show_message(message, Tone::for_command(command));
        info!("{message}");

        let delay = self.engine.config.command_delay_ms;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let outcome = self.unit.command(command).await;
        let answered_ms = self.now_ms();
        self.engine.record_outcome(command, outcome, answered_ms);

        match (command, outcome) {
            (UnitCommand::Off, CommandOutcome::Accepted) => {
                let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
                if self.engine.is_guard_active(answered_ms) {
                    info!(
                        "shut off at {timestamp}; restarts blocked for {}s",
                        self.engine.guard_remaining_ms(answered_ms) / 1_000
                    );
                } else {
                    info!("shut off at {timestamp}");
                }
            }
            (_, CommandOutcome::Accepted) => {
                info!("'{}' acknowledged, confirming on next status refresh", command.as_param());
            }
            (_, CommandOutcome::Rejected) => {
                error!("'{}' not acknowledged, will re-evaluate next cycle", command.as_param());
            }
            (_, CommandOutcome::Unknown) => {
                warn!("'{}' outcome unknown, will re-evaluate next cycle", command.as_param());
            }
        }
    }
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
