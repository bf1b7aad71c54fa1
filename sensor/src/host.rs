use std::time::Duration;

use anyhow::Context;
use tracing::info;

use thermostat_sensor::{SensorPort, W1Probe, DEFAULT_W1_BASE_DIR};

/// Diagnostic reader: logs the probe's temperature on a fixed interval.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut probe = match std::env::var("W1_DEVICE_FILE") {
        Ok(file) => W1Probe::new(file),
        Err(_) => {
            let base_dir =
                std::env::var("W1_BASE_DIR").unwrap_or_else(|_| DEFAULT_W1_BASE_DIR.to_string());
            W1Probe::discover(&base_dir)
                .with_context(|| format!("failed to locate a DS18B20 under {base_dir}"))?
        }
    };

    let interval_secs = std::env::var("SENSOR_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(5);

    info!(
        "reading {} every {interval_secs}s",
        probe.device_file().display()
    );

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let temperature_f = probe.read_fahrenheit().await;
        info!("temperature: {temperature_f:.2}°F");
    }
}
