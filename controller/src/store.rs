use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use thermostat_common::{RuntimeConfig, ThermostatSettings};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode settings")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Owns the thermostat settings and their JSON record on disk.
///
/// Cloning hands out another handle to the same state. Every mutation is
/// written out before the in-memory copy changes, so readers never see a
/// value that failed to persist.
#[derive(Clone)]
pub struct SettingsStore {
    path: Arc<PathBuf>,
    settings: Arc<Mutex<ThermostatSettings>>,
}

impl SettingsStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let settings = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<ThermostatSettings>(&raw).map_err(|source| {
                SettingsError::Parse {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let defaults = ThermostatSettings::default();
                info!(
                    "no settings at {}, starting with defaults ({} °F, mode {}, fan {})",
                    path.display(),
                    defaults.preferred_temperature_f,
                    defaults.mode,
                    defaults.fan_mode
                );
                defaults
            }
            Err(source) => return Err(SettingsError::Read { path, source }),
        };

        Ok(Self {
            path: Arc::new(path),
            settings: Arc::new(Mutex::new(settings)),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_ref()
    }

    pub async fn snapshot(&self) -> ThermostatSettings {
        self.settings.lock().await.clone()
    }

    pub async fn update<F>(&self, apply: F) -> Result<ThermostatSettings, SettingsError>
    where
        F: FnOnce(&mut ThermostatSettings),
    {
        let mut current = self.settings.lock().await;
        let mut next = current.clone();
        apply(&mut next);
        write_settings(&self.path, &next).await?;
        *current = next.clone();
        Ok(next)
    }

    pub async fn persist(&self) -> Result<(), SettingsError> {
        let current = self.settings.lock().await;
        write_settings(&self.path, &current).await
    }
}

async fn write_settings(path: &Path, settings: &ThermostatSettings) -> Result<(), SettingsError> {
    let payload = serde_json::to_vec_pretty(settings)?;
    write_atomic(path, &payload)
        .await
        .map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_atomic(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, payload).await?;
    tokio::fs::rename(&staging, path).await
}

pub async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("no runtime config at {}, using defaults", path.display());
            Ok(RuntimeConfig::default())
        }
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

#[cfg(test)]
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "thermostat-controller-{name}-{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use thermostat_common::{FanMode, Mode};

    use super::*;

    #[tokio::test]
    async fn missing_record_starts_with_defaults() {
        let dir = scratch_dir("store-defaults");
        let store = SettingsStore::open(dir.join("settings.json")).await.unwrap();

        assert_eq!(store.snapshot().await, ThermostatSettings::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn preferred_temperature_survives_restart() {
        let dir = scratch_dir("store-restart");
        let path = dir.join("settings.json");

        let store = SettingsStore::open(&path).await.unwrap();
        store
            .update(|settings| settings.preferred_temperature_f = 72.5)
            .await
            .unwrap();
        assert_eq!(store.snapshot().await.preferred_temperature_f, 72.5);
        drop(store);

        let reopened = SettingsStore::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot().await.preferred_temperature_f, 72.5);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn record_is_rewritten_in_full() {
        let dir = scratch_dir("store-full");
        let path = dir.join("settings.json");
        let store = SettingsStore::open(&path).await.unwrap();

        store.update(|settings| settings.mode = Mode::Cool).await.unwrap();
        store
            .update(|settings| settings.fan_mode = FanMode::On)
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "preferredTemperature": 70.0,
                "mode": "cool",
                "fanMode": "on",
            })
        );
    }

    #[tokio::test]
    async fn failed_write_leaves_settings_untouched() {
        let dir = scratch_dir("store-failed");
        // A directory where the file should be makes the rename fail.
        let path = dir.join("settings.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let store = SettingsStore::open(dir.join("missing.json")).await.unwrap();
        let blocked = SettingsStore {
            path: Arc::new(path),
            settings: store.settings.clone(),
        };

        let result = blocked
            .update(|settings| settings.preferred_temperature_f = 90.0)
            .await;
        assert!(matches!(result, Err(SettingsError::Write { .. })));
        assert_eq!(store.snapshot().await.preferred_temperature_f, 70.0);
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let dir = scratch_dir("store-corrupt");
        let path = dir.join("settings.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            SettingsStore::open(&path).await,
            Err(SettingsError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn runtime_config_defaults_when_absent() {
        let dir = scratch_dir("runtime-absent");
        let config = load_runtime_config(&dir.join("runtime.json")).await.unwrap();
        assert_eq!(config.rpc.port, 4242);
    }

    #[tokio::test]
    async fn malformed_runtime_config_is_an_error() {
        let dir = scratch_dir("runtime-malformed");
        let path = dir.join("runtime.json");
        std::fs::write(&path, br#"{"rpc":{"port":"not a port"}}"#).unwrap();

        let err = load_runtime_config(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("runtime.json"));
    }
}
