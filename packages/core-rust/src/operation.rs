//! A single unit of database work with captured timing and outcome.
//!
//! An [`Operation`] binds a [`Job`] to a database capability handle. Its
//! execution state lives behind a mutex so pollers can read a consistent
//! snapshot while the orchestrator runs it; the lock is never held across
//! the database call itself.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, info_span, warn, Instrument};

use crate::client::DatabaseClient;
use crate::dataset::{DbDataSet, QueryDataSet};
use crate::id::new_guid;
use crate::job::Job;

/// Lifecycle position of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Created, not yet started.
    Pending,
    /// Started, the database call has not returned.
    Running,
    /// Completed with a result.
    Succeeded,
    /// Completed with at least one error.
    Failed,
}

/// Result view of an operation: the success value, if any, and its errors.
///
/// Errors are empty on success. A failed operation has no result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationResult {
    pub result: Option<Value>,
    pub errors: Vec<String>,
}

/// Stable envelope returned to pollers, independent of success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationOutput {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub status: OperationStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    /// Human-readable duration, e.g. `12ms 40us`.
    pub duration: String,
    pub output: OperationResult,
}

#[derive(Debug, Default)]
struct ExecutionState {
    started: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
    result: Option<Value>,
    errors: Vec<String>,
}

impl ExecutionState {
    fn duration(&self) -> Duration {
        match (self.started, self.completed) {
            (Some(started), Some(completed)) => clamped_duration(started, completed),
            _ => Duration::ZERO,
        }
    }

    fn status(&self) -> OperationStatus {
        match (self.started, self.completed) {
            (None, _) => OperationStatus::Pending,
            (Some(_), None) => OperationStatus::Running,
            (Some(_), Some(_)) if self.errors.is_empty() => OperationStatus::Succeeded,
            (Some(_), Some(_)) => OperationStatus::Failed,
        }
    }
}

/// Elapsed time between two wall-clock instants, clamped to zero when the
/// clock stepped backwards.
#[must_use]
pub fn clamped_duration(started: DateTime<Utc>, completed: DateTime<Utc>) -> Duration {
    (completed - started).to_std().unwrap_or(Duration::ZERO)
}

/// One executable unit of database work.
pub struct Operation {
    id: String,
    job: Job,
    client: Arc<dyn DatabaseClient>,
    created: DateTime<Utc>,
    state: Mutex<ExecutionState>,
}

impl Operation {
    /// Creates a pending operation that will run `job` against `client`.
    #[must_use]
    pub fn new(client: Arc<dyn DatabaseClient>, job: Job) -> Self {
        Self {
            id: new_guid(),
            job,
            client,
            created: Utc::now(),
            state: Mutex::new(ExecutionState::default()),
        }
    }

    #[must_use]
    pub fn seed(client: Arc<dyn DatabaseClient>, data: DbDataSet) -> Self {
        Self::new(client, Job::Seed(data))
    }

    #[must_use]
    pub fn read(client: Arc<dyn DatabaseClient>, query: impl Into<String>) -> Self {
        Self::new(client, Job::Read(QueryDataSet::new("query", query)))
    }

    #[must_use]
    pub fn write(client: Arc<dyn DatabaseClient>, data: DbDataSet) -> Self {
        Self::new(client, Job::Write(data))
    }

    #[must_use]
    pub fn delete(client: Arc<dyn DatabaseClient>, data: DbDataSet) -> Self {
        Self::new(client, Job::Delete(data))
    }

    #[must_use]
    pub fn query(client: Arc<dyn DatabaseClient>, query: QueryDataSet) -> Self {
        Self::new(client, Job::Query(query))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    #[must_use]
    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started
    }

    #[must_use]
    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.state.lock().completed
    }

    /// Time between start and completion; zero until completed.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.state.lock().duration()
    }

    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.state.lock().status()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.clone()
    }

    #[must_use]
    pub fn result(&self) -> OperationResult {
        let state = self.state.lock();
        OperationResult {
            result: state.result.clone(),
            errors: state.errors.clone(),
        }
    }

    /// Snapshot of the operation as returned to pollers.
    #[must_use]
    pub fn output(&self) -> OperationOutput {
        let state = self.state.lock();
        OperationOutput {
            id: self.id.clone(),
            name: self.name().to_string(),
            status: state.status(),
            created: self.created,
            started: state.started,
            completed: state.completed,
            duration: humantime::format_duration(state.duration()).to_string(),
            output: OperationResult {
                result: state.result.clone(),
                errors: state.errors.clone(),
            },
        }
    }

    /// Executes the bound job once, capturing timing and outcome.
    ///
    /// A failure is appended to the error list rather than returned; callers
    /// inspect [`Operation::errors`] to detect it. Calling `start` on an
    /// operation that has already started does nothing.
    pub async fn start(&self) {
        if !self.mark_started() {
            warn!(operation_id = %self.id, "operation already started, ignoring");
            return;
        }

        let span = info_span!(
            "operation",
            operation_id = %self.id,
            operation = self.name(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async {
            let outcome = self.job.execute(self.client.as_ref()).await;
            let (duration, failed) = self.mark_completed(outcome);
            let outcome = if failed { "error" } else { "ok" };

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = duration.as_millis() as u64;
            tracing::Span::current().record("duration_ms", duration_ms);
            tracing::Span::current().record("outcome", outcome);

            info!(
                operation_id = %self.id,
                operation = self.name(),
                duration_ms = duration_ms,
                outcome = outcome,
                "operation complete"
            );
        }
        .instrument(span)
        .await;
    }

    fn mark_started(&self) -> bool {
        let mut state = self.state.lock();
        if state.started.is_some() {
            return false;
        }
        state.started = Some(Utc::now());
        true
    }

    fn mark_completed(&self, outcome: anyhow::Result<Value>) -> (Duration, bool) {
        let mut state = self.state.lock();
        match outcome {
            Ok(value) => state.result = Some(value),
            Err(err) => {
                let message = format!("{err:#}");
                warn!(operation_id = %self.id, error = %message, "operation failed");
                state.errors.push(message);
            }
        }
        state.completed = Some(Utc::now());
        (state.duration(), !state.errors.is_empty())
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("created", &self.created)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
