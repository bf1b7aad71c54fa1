use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use thermostat_common::{ControllerStatus, FanMode, Mode};

use crate::{
    error_chain,
    store::{SettingsError, SettingsStore},
};

/// Remote get/set surface over the shared settings.
///
/// Talks to the control loop only through the store and the status
/// snapshot it publishes.
#[derive(Clone)]
pub struct SettingsService {
    store: SettingsStore,
    status: watch::Receiver<Option<ControllerStatus>>,
}

#[derive(Debug, Serialize)]
struct ValueBody<T> {
    value: T,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl SettingsService {
    pub fn new(store: SettingsStore, status: watch::Receiver<Option<ControllerStatus>>) -> Self {
        Self { store, status }
    }

    pub async fn get_preferred_temperature(&self) -> f32 {
        let value = self.store.snapshot().await.preferred_temperature_f;
        info!("preferred temperature: {value}");
        value
    }

    /// Out-of-range values are stored as-is.
    pub async fn set_preferred_temperature(&self, value: f32) -> Result<(), SettingsError> {
        self.store
            .update(|settings| settings.preferred_temperature_f = value)
            .await?;
        info!("setting preferred temperature to {value}");
        Ok(())
    }

    pub async fn get_mode(&self) -> Mode {
        let mode = self.store.snapshot().await.mode;
        info!("mode: {mode}");
        mode
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<(), SettingsError> {
        self.store.update(|settings| settings.mode = mode).await?;
        info!("setting mode to {mode}");
        Ok(())
    }

    pub async fn get_fan_mode(&self) -> FanMode {
        let fan_mode = self.store.snapshot().await.fan_mode;
        info!("fan mode: {fan_mode}");
        fan_mode
    }

    pub async fn set_fan_mode(&self, fan_mode: FanMode) -> Result<(), SettingsError> {
        self.store
            .update(|settings| settings.fan_mode = fan_mode)
            .await?;
        info!("setting fan mode to {fan_mode}");
        Ok(())
    }

    pub fn current_temperature(&self) -> Option<f32> {
        self.status
            .borrow()
            .as_ref()
            .and_then(|status| status.current_temp_f)
    }

    pub fn status(&self) -> Option<ControllerStatus> {
        self.status.borrow().clone()
    }
}

pub fn router(service: SettingsService) -> Router {
    Router::new()
        .route(
            "/api/preferred-temperature",
            get(handle_get_preferred).post(handle_set_preferred),
        )
        .route("/api/mode", get(handle_get_mode).post(handle_set_mode))
        .route(
            "/api/fan-mode",
            get(handle_get_fan_mode).post(handle_set_fan_mode),
        )
        .route("/api/current-temperature", get(handle_get_current))
        .route("/api/status", get(handle_get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn handle_get_preferred(State(service): State<SettingsService>) -> impl IntoResponse {
    Json(ValueBody {
        value: service.get_preferred_temperature().await,
    })
}

async fn handle_set_preferred(
    State(service): State<SettingsService>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(value) = value.trim().parse::<f32>().ok().filter(|v| v.is_finite()) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    if let Err(err) = service.set_preferred_temperature(value).await {
        return persist_failure(&err);
    }

    handle_get_preferred(State(service)).await.into_response()
}

async fn handle_get_mode(State(service): State<SettingsService>) -> impl IntoResponse {
    Json(ValueBody {
        value: service.get_mode().await,
    })
}

async fn handle_set_mode(
    State(service): State<SettingsService>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(mode) = value.parse::<Mode>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Use 'off', 'heat' or 'cool'",
        );
    };

    if let Err(err) = service.set_mode(mode).await {
        return persist_failure(&err);
    }

    handle_get_mode(State(service)).await.into_response()
}

async fn handle_get_fan_mode(State(service): State<SettingsService>) -> impl IntoResponse {
    Json(ValueBody {
        value: service.get_fan_mode().await,
    })
}

async fn handle_set_fan_mode(
    State(service): State<SettingsService>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(fan_mode) = value.parse::<FanMode>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid fan mode. Use 'auto' or 'on'",
        );
    };

    if let Err(err) = service.set_fan_mode(fan_mode).await {
        return persist_failure(&err);
    }

    handle_get_fan_mode(State(service)).await.into_response()
}

async fn handle_get_current(State(service): State<SettingsService>) -> impl IntoResponse {
    Json(ValueBody {
        value: service.current_temperature(),
    })
}

async fn handle_get_status(State(service): State<SettingsService>) -> impl IntoResponse {
    match service.status() {
        Some(status) => Json(status).into_response(),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Controller has not completed a cycle yet",
        ),
    }
}

fn persist_failure(err: &SettingsError) -> axum::response::Response {
    warn!("failed to persist settings update: {}", error_chain(err));
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to persist settings",
    )
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::store::scratch_dir;

    async fn service(name: &str) -> (SettingsService, watch::Sender<Option<ControllerStatus>>) {
        let store = SettingsStore::open(scratch_dir(name).join("settings.json"))
            .await
            .unwrap();
        let (status_tx, status_rx) = watch::channel(None);
        (SettingsService::new(store, status_rx), status_tx)
    }

    async fn call(service: &SettingsService, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = router(service.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn preferred_temperature_round_trips_through_storage() {
        let (service, _status) = service("service-preferred").await;

        let (code, body) = call(&service, "POST", "/api/preferred-temperature?value=72.5").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({ "value": 72.5 }));

        let (_, body) = call(&service, "GET", "/api/preferred-temperature").await;
        assert_eq!(body, json!({ "value": 72.5 }));

        let reloaded = SettingsStore::open(service.store.path().to_path_buf())
            .await
            .unwrap();
        assert_eq!(reloaded.snapshot().await.preferred_temperature_f, 72.5);
    }

    #[tokio::test]
    async fn out_of_range_setpoint_is_accepted() {
        let (service, _status) = service("service-range").await;

        let (code, body) = call(&service, "POST", "/api/preferred-temperature?value=-40").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({ "value": -40.0 }));
    }

    #[tokio::test]
    async fn rejects_non_numeric_setpoint() {
        let (service, _status) = service("service-nan").await;

        for uri in [
            "/api/preferred-temperature?value=warm",
            "/api/preferred-temperature?value=NaN",
            "/api/preferred-temperature",
        ] {
            let (code, body) = call(&service, "POST", uri).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body.get("error").is_some());
        }
        assert_eq!(service.get_preferred_temperature().await, 70.0);
    }

    #[tokio::test]
    async fn mode_and_fan_mode_are_settable() {
        let (service, _status) = service("service-modes").await;

        let (code, body) = call(&service, "POST", "/api/mode?value=COOL").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, json!({ "value": "cool" }));
        assert_eq!(service.get_mode().await, Mode::Cool);

        let (_, body) = call(&service, "POST", "/api/fan-mode?value=on").await;
        assert_eq!(body, json!({ "value": "on" }));
        let (_, body) = call(&service, "GET", "/api/fan-mode").await;
        assert_eq!(body, json!({ "value": "on" }));

        let (code, _) = call(&service, "POST", "/api/mode?value=dry").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(service.get_mode().await, Mode::Cool);
    }

    #[tokio::test]
    async fn current_temperature_follows_published_status() {
        let (service, status_tx) = service("service-current").await;

        let (_, body) = call(&service, "GET", "/api/current-temperature").await;
        assert_eq!(body, json!({ "value": null }));
        let (code, _) = call(&service, "GET", "/api/status").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        status_tx.send_replace(Some(ControllerStatus {
            current_temp_f: Some(71.5),
            preferred_temp_f: 70.0,
            mode: "cool",
            fan_mode: "auto",
            state: "COOLING",
            unit: None,
            guard_active: false,
            guard_remaining_sec: 0,
            cycles: 3,
        }));

        let (_, body) = call(&service, "GET", "/api/current-temperature").await;
        assert_eq!(body, json!({ "value": 71.5 }));
        let (code, body) = call(&service, "GET", "/api/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["state"], "COOLING");
        assert_eq!(body["cycles"], 3);
    }
}
