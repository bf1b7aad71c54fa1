use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error_chain;
use thermostat_common::{CommandOutcome, RemoteUnitState, UnitCommand, UnitConfig, UnitFlags};

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("hvac switch unreachable")]
    Transport(#[source] reqwest::Error),
    #[error("hvac switch answered HTTP {0}")]
    Status(StatusCode),
    #[error("unexpected hvac switch response: {0}")]
    Protocol(String),
}

impl UnitError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for UnitError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_body() {
            Self::Protocol(err.to_string())
        } else {
            Self::Transport(err)
        }
    }
}

/// The HVAC switch as the control loop sees it. Failures never escape:
/// they come back as `Unknown` state or a non-accepted outcome.
#[async_trait]
pub trait RemoteUnit: Send + Sync {
    async fn query_state(&self) -> RemoteUnitState;
    async fn command(&self, command: UnitCommand) -> CommandOutcome;
}

pub struct HttpRemoteUnit {
    client: reqwest::Client,
    command_url: String,
    status_url: String,
}

impl HttpRemoteUnit {
    pub fn new(config: &UnitConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            command_url: config.command_url.clone(),
            status_url: config.status_url.clone(),
        })
    }

    async fn fetch_flags(&self) -> Result<UnitFlags, UnitError> {
        let body: Value = self.client.get(&self.status_url).send().await?.json().await?;
        let code = body
            .get("result")
            .and_then(Value::as_i64)
            .ok_or_else(|| UnitError::Protocol(format!("missing numeric 'result' in {body}")))?;
        Ok(UnitFlags::decode(code))
    }

    async fn send(&self, command: UnitCommand) -> Result<i64, UnitError> {
        let response = self
            .client
            .post(&self.command_url)
            .form(&[("params", command.as_param())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UnitError::Status(status));
        }

        let body: Value = response.json().await?;
        body.get("return_value")
            .and_then(Value::as_i64)
            .ok_or_else(|| UnitError::Protocol(format!("missing 'return_value' in {body}")))
    }
}

#[async_trait]
impl RemoteUnit for HttpRemoteUnit {
    async fn query_state(&self) -> RemoteUnitState {
        match self.fetch_flags().await {
            Ok(flags) => {
                debug!("unit status: {flags:?}");
                RemoteUnitState::Known(flags)
            }
            Err(err) => {
                log_failure("status query", &err);
                RemoteUnitState::Unknown
            }
        }
    }

    async fn command(&self, command: UnitCommand) -> CommandOutcome {
        match self.send(command).await {
            Ok(code) if code == command.ack_code() => CommandOutcome::Accepted,
            Ok(code) => {
                error!(
                    "hvac switch rejected '{}' (return_value {code})",
                    command.as_param()
                );
                CommandOutcome::Rejected
            }
            Err(err) if err.is_transient() => {
                log_failure(command.as_param(), &err);
                CommandOutcome::Unknown
            }
            Err(err) => {
                log_failure(command.as_param(), &err);
                CommandOutcome::Rejected
            }
        }
    }
}

fn log_failure(call: &str, err: &UnitError) {
    if err.is_transient() {
        warn!("{call}: {}", error_chain(err));
    } else {
        error!("{call}: {}", error_chain(err));
    }
}
