//! Liveness and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::api::AppState;
use crate::lifecycle::HealthState;

/// Fixed liveness payload. Always 200 while the listener is up.
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// 200 while submissions are accepted, 503 while starting or shutting down.
pub async fn readiness_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let health = state.shutdown.health_state();
    let status = if health == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "state": health.as_str() })))
}
