//! Shutdown and client-management endpoints.

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{ApiError, AppState};

const CLIENT_ACTIONS: [&str; 4] = ["configure", "reconnect", "connect", "disconnect"];
const CLIENT_TARGETS: [&str; 2] = ["primary", "secondary"];

/// Starts the graceful close sequence and answers `202` straight away.
/// Repeated calls are accepted and do nothing.
pub async fn close_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    if state.close.close().is_none() {
        debug!("close already in progress");
    }
    (StatusCode::ACCEPTED, Json(json!({ "status": "closing" })))
}

/// `client/{action}/{target}`: routed but not implemented.
pub async fn client_handler(
    method: Method,
    Path((action, target)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if method == Method::OPTIONS {
        return Ok(StatusCode::OK);
    }
    let route = format!("client/{action}/{target}");
    if !CLIENT_ACTIONS.contains(&action.as_str()) || !CLIENT_TARGETS.contains(&target.as_str()) {
        return Err(ApiError::NotFound(route));
    }
    Err(ApiError::NotImplemented(route))
}
