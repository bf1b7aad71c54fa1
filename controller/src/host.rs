use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info, warn};

use thermostat_common::{
    CommandOutcome, DisplayConfig, RuntimeConfig, SensorConfig, UnitCommand,
};
use thermostat_sensor::W1Probe;

use crate::{
    control::ControlLoop,
    display::{DisplayPort, FileDisplay, LogDisplay, Tone},
    error_chain,
    service::{self, SettingsService},
    store::{self, SettingsStore},
    unit::{HttpRemoteUnit, RemoteUnit},
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.thermostat"));

    let mut runtime = store::load_runtime_config(&data_dir.join("runtime.json"))
        .await
        .context("failed to load runtime config")?;
    apply_env_overrides(&mut runtime);
    runtime.control.sanitize();

    let store = SettingsStore::open(data_dir.join("settings.json"))
        .await
        .context("failed to load thermostat settings")?;
    let unit = Arc::new(
        HttpRemoteUnit::new(&runtime.unit).context("failed to build hvac switch client")?,
    );
    let sensor = open_sensor(&runtime.sensor)?;

    let (status_tx, status_rx) = watch::channel(None);
    let app = service::router(SettingsService::new(store.clone(), status_rx));

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.rpc.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind settings service at {addr}"))?;
    info!("settings service listening on http://{addr}");
    let mut server = tokio::spawn(async move { axum::serve(listener, app).await });

    let control = ControlLoop::new(
        runtime.control.clone(),
        store.clone(),
        sensor,
        unit.clone(),
        open_display(&runtime.display),
        status_tx,
    );
    let mut control_task = tokio::spawn(control.run());

    let outcome: anyhow::Result<()> = tokio::select! {
        joined = &mut control_task => match joined {
            Ok(Ok(never)) => match never {},
            Ok(Err(err)) => Err(anyhow::Error::new(err).context("control loop failed")),
            Err(err) => Err(anyhow::Error::new(err).context("control loop task died")),
        },
        served = &mut server => match served {
            Ok(Ok(())) => Err(anyhow!("settings service stopped unexpectedly")),
            Ok(Err(err)) => Err(anyhow::Error::new(err).context("settings service failed")),
            Err(err) => Err(anyhow::Error::new(err).context("settings service task died")),
        },
        () = shutdown_signal() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    control_task.abort();
    server.abort();

    if let Err(err) = &outcome {
        error!("{err:?}");
    }

    let mut display = open_display(&runtime.display);
    display.show_message(UnitCommand::Off.display_message(), Tone::Neutral);
    shut_down(unit.as_ref(), &store).await;

    outcome
}

/// Best-effort exit path: command the unit off and persist settings.
async fn shut_down(unit: &impl RemoteUnit, store: &SettingsStore) {
    info!("Shutting Off");
    match unit.command(UnitCommand::Off).await {
        CommandOutcome::Accepted => info!("unit acknowledged final shutdown"),
        other => warn!("final shutdown not confirmed ({other:?})"),
    }

    match store.persist().await {
        Ok(()) => info!("settings saved to {}", store.path().display()),
        Err(err) => error!("failed to save settings on exit: {}", error_chain(&err)),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Some(port) = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.rpc.port = port;
    }
    if let Ok(url) = std::env::var("HVAC_COMMAND_URL") {
        runtime.unit.command_url = url;
    }
    if let Ok(url) = std::env::var("HVAC_STATUS_URL") {
        runtime.unit.status_url = url;
    }
    if let Ok(file) = std::env::var("W1_DEVICE_FILE") {
        runtime.sensor.device_file = Some(file);
    }
    if let Ok(file) = std::env::var("DISPLAY_FILE") {
        runtime.display.file = Some(file);
    }
}

fn open_sensor(config: &SensorConfig) -> anyhow::Result<W1Probe> {
    let probe = match &config.device_file {
        Some(file) => W1Probe::new(file),
        None => W1Probe::discover(&config.w1_base_dir)
            .with_context(|| format!("failed to locate a DS18B20 under {}", config.w1_base_dir))?,
    };
    Ok(probe.with_backoff(std::time::Duration::from_millis(
        config.retry_backoff_ms,
    )))
}

fn open_display(config: &DisplayConfig) -> Box<dyn DisplayPort> {
    match &config.file {
        Some(path) => Box::new(FileDisplay::new(path)),
        None => Box::new(LogDisplay),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use thermostat_common::{Mode, RemoteUnitState};

    use super::*;
    use crate::store::scratch_dir;

    #[derive(Default)]
    struct UnreachableUnit {
        commands: Mutex<Vec<UnitCommand>>,
    }

    #[async_trait]
    impl RemoteUnit for UnreachableUnit {
        async fn query_state(&self) -> RemoteUnitState {
            RemoteUnitState::Unknown
        }

        async fn command(&self, command: UnitCommand) -> CommandOutcome {
            self.commands.lock().unwrap().push(command);
            CommandOutcome::Unknown
        }
    }

    #[tokio::test]
    async fn exit_saves_settings_even_when_shutdown_is_unconfirmed() {
        let path = scratch_dir("exit").join("settings.json");
        let store = SettingsStore::open(&path).await.unwrap();
        store
            .update(|settings| {
                settings.mode = Mode::Heat;
                settings.preferred_temperature_f = 66.5;
            })
            .await
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        let unit = UnreachableUnit::default();
        shut_down(&unit, &store).await;

        assert_eq!(*unit.commands.lock().unwrap(), vec![UnitCommand::Off]);
        let reloaded = SettingsStore::open(&path).await.unwrap().snapshot().await;
        assert_eq!(reloaded.mode, Mode::Heat);
        assert_eq!(reloaded.preferred_temperature_f, 66.5);
    }

    #[test]
    fn env_overrides_replace_switch_urls() {
        let mut runtime = RuntimeConfig::default();
        std::env::set_var("HVAC_STATUS_URL", "http://switch.local/status");
        apply_env_overrides(&mut runtime);
        std::env::remove_var("HVAC_STATUS_URL");
        assert_eq!(runtime.unit.status_url, "http://switch.local/status");
    }
}
