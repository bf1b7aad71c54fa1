//! DS18B20 probe access through the Linux `w1_therm` sysfs interface.
//!
//! The kernel exposes each probe as `<base>/28-xxxxxxxxxxxx/w1_slave`:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line ends in `YES` once the CRC checks out; `t=` is millidegrees
//! Celsius.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_W1_BASE_DIR: &str = "/sys/bus/w1/devices";
pub const DS18B20_FAMILY_PREFIX: &str = "28";
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no DS18B20 device found under {0}")]
    NoDevice(PathBuf),
    #[error("failed to scan {path}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Source of the current temperature.
///
/// Implementations block until a valid reading exists; there is no error path.
#[async_trait]
pub trait SensorPort: Send {
    async fn read_fahrenheit(&mut self) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frame {
    /// CRC line did not end in `YES`; read again.
    Pending,
    Celsius(f32),
    Malformed,
}

pub fn parse_frame(raw: &str) -> Frame {
    let mut lines = raw.lines();
    let Some(status) = lines.next() else {
        return Frame::Pending;
    };
    if !status.trim_end().ends_with("YES") {
        return Frame::Pending;
    }

    let Some(data) = lines.next() else {
        return Frame::Malformed;
    };
    let Some(pos) = data.find("t=") else {
        return Frame::Malformed;
    };

    match data[pos + 2..].trim().parse::<f32>() {
        Ok(millidegrees) if millidegrees.is_finite() => Frame::Celsius(millidegrees / 1000.0),
        _ => Frame::Malformed,
    }
}

pub fn celsius_to_fahrenheit(temp_c: f32) -> f32 {
    temp_c * 9.0 / 5.0 + 32.0
}

#[derive(Debug, Clone)]
pub struct W1Probe {
    device_file: PathBuf,
    backoff: Duration,
}

impl W1Probe {
    pub fn new(device_file: impl Into<PathBuf>) -> Self {
        Self {
            device_file: device_file.into(),
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Picks the first `28-*` directory under `base_dir`, sorted by name.
    pub fn discover(base_dir: impl AsRef<Path>) -> Result<Self, SensorError> {
        let base_dir = base_dir.as_ref();
        let entries = std::fs::read_dir(base_dir).map_err(|source| SensorError::Scan {
            path: base_dir.to_path_buf(),
            source,
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(DS18B20_FAMILY_PREFIX)
            })
            .map(|entry| entry.path().join("w1_slave"))
            .collect();
        candidates.sort();

        let device_file = candidates
            .into_iter()
            .next()
            .ok_or_else(|| SensorError::NoDevice(base_dir.to_path_buf()))?;

        info!("using DS18B20 at {}", device_file.display());
        Ok(Self::new(device_file))
    }

    pub fn device_file(&self) -> &Path {
        &self.device_file
    }

    pub async fn read_celsius(&self) -> f32 {
        let mut failing = false;
        loop {
            match tokio::fs::read_to_string(&self.device_file).await {
                Ok(raw) => match parse_frame(&raw) {
                    Frame::Celsius(temp_c) => {
                        if failing {
                            info!("DS18B20 readings recovered");
                        }
                        return temp_c;
                    }
                    Frame::Pending => debug!("DS18B20 frame not ready"),
                    Frame::Malformed => {
                        if !failing {
                            warn!("malformed DS18B20 frame: {raw:?}");
                        }
                        failing = true;
                    }
                },
                Err(err) => {
                    if !failing {
                        warn!(
                            "failed to read {}: {err}; retrying",
                            self.device_file.display()
                        );
                    }
                    failing = true;
                }
            }
            tokio::time::sleep(self.backoff).await;
        }
    }
}

#[async_trait]
impl SensorPort for W1Probe {
    async fn read_fahrenheit(&mut self) -> f32 {
        let temp_c = self.read_celsius().await;
        let temp_f = celsius_to_fahrenheit(temp_c);
        debug!("[DS18B20] Temperature: {:.2}°F ({:.3}°C)", temp_f, temp_c);
        temp_f
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                         72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "thermostat-sensor-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn parses_valid_frame() {
        assert_eq!(parse_frame(VALID), Frame::Celsius(23.125));
    }

    #[test]
    fn crc_failure_is_pending() {
        let raw = "72 01 4b 46 7f ff 0e 10 57 : crc=57 NO\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        assert_eq!(parse_frame(raw), Frame::Pending);
        assert_eq!(parse_frame(""), Frame::Pending);
    }

    #[test]
    fn missing_temperature_field_is_malformed() {
        let raw = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57\n";
        assert_eq!(parse_frame(raw), Frame::Malformed);
        assert_eq!(
            parse_frame("aa : crc=57 YES\naa t=abc\n"),
            Frame::Malformed
        );
        assert_eq!(parse_frame("aa : crc=57 YES\naa t=NaN\n"), Frame::Malformed);
    }

    #[test]
    fn negative_readings_parse() {
        let raw = "ff : crc=11 YES\nff t=-1250\n";
        assert_eq!(parse_frame(raw), Frame::Celsius(-1.25));
    }

    #[test]
    fn converts_to_fahrenheit() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
        assert!((celsius_to_fahrenheit(23.125) - 73.625).abs() < 1e-4);
    }

    #[test]
    fn discovers_first_family_28_device() {
        let base = scratch_dir("discover");
        std::fs::create_dir_all(base.join("w1_bus_master1")).unwrap();
        std::fs::create_dir_all(base.join("28-00000b2c1f9a")).unwrap();
        std::fs::create_dir_all(base.join("28-00000a0c0001")).unwrap();

        let probe = W1Probe::discover(&base).unwrap();
        assert_eq!(
            probe.device_file(),
            base.join("28-00000a0c0001").join("w1_slave")
        );
    }

    #[test]
    fn discovery_without_probe_fails() {
        let base = scratch_dir("empty");
        assert!(matches!(
            W1Probe::discover(&base),
            Err(SensorError::NoDevice(_))
        ));
    }

    #[tokio::test]
    async fn retries_until_frame_is_valid() {
        let dir = scratch_dir("retry");
        let file = dir.join("w1_slave");
        std::fs::write(&file, "aa : crc=00 NO\naa t=0\n").unwrap();

        let mut probe = W1Probe::new(&file).with_backoff(Duration::from_millis(5));
        let writer = {
            let file = file.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                tokio::fs::write(&file, VALID).await.unwrap();
            })
        };

        let temp_f = probe.read_fahrenheit().await;
        writer.await.unwrap();
        assert!((temp_f - 73.625).abs() < 1e-4);
    }
}
