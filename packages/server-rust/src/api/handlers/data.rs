//! Submission endpoints. Each wraps its body in a one-operation set
//! against the primary and answers `202` with the receipt.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use rpt_core::{DbDataSet, Job, QueryDataSet};

use crate::api::{ApiError, AppState, JsonBody};
use crate::control::{SubmissionReceipt, Target};

type Accepted = (StatusCode, Json<SubmissionReceipt>);

pub async fn seed_handler(
    State(state): State<AppState>,
    JsonBody(data): JsonBody<DbDataSet>,
) -> Result<Accepted, ApiError> {
    accept(&state, Job::Seed(data)).await
}

pub async fn read_handler(
    State(state): State<AppState>,
    JsonBody(query): JsonBody<QueryDataSet>,
) -> Result<Accepted, ApiError> {
    accept(&state, Job::Read(query)).await
}

pub async fn write_handler(
    State(state): State<AppState>,
    JsonBody(data): JsonBody<DbDataSet>,
) -> Result<Accepted, ApiError> {
    accept(&state, Job::Write(data)).await
}

pub async fn delete_handler(
    State(state): State<AppState>,
    JsonBody(data): JsonBody<DbDataSet>,
) -> Result<Accepted, ApiError> {
    accept(&state, Job::Delete(data)).await
}

pub async fn query_handler(
    State(state): State<AppState>,
    JsonBody(query): JsonBody<QueryDataSet>,
) -> Result<Accepted, ApiError> {
    accept(&state, Job::Query(query)).await
}

async fn accept(state: &AppState, job: Job) -> Result<Accepted, ApiError> {
    let receipt = state.control.submit_job(Target::Primary, job).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}
