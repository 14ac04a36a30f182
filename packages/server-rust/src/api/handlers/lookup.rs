//! Polling endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::api::AppState;
use crate::config::ApiConfig;
use crate::control::{LookupResult, WorkflowSnapshot};

/// Envelope of the set or operation with this identifier, or `null`.
pub async fn operation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Option<LookupResult>> {
    Json(state.control.find(&id))
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    #[serde(flatten)]
    pub snapshot: WorkflowSnapshot,
    pub base_path: String,
    pub listen_addr: String,
    pub uptime_secs: u64,
}

impl WorkflowResponse {
    fn new(snapshot: WorkflowSnapshot, config: &Arc<ApiConfig>, uptime_secs: u64) -> Self {
        Self {
            snapshot,
            base_path: config.base_path.clone(),
            listen_addr: config.listen_addr.clone(),
            uptime_secs,
        }
    }
}

/// Diagnostic snapshot of the control surface.
pub async fn workflow_handler(State(state): State<AppState>) -> Json<WorkflowResponse> {
    Json(WorkflowResponse::new(
        state.control.snapshot(),
        &state.config,
        state.start_time.elapsed().as_secs(),
    ))
}
