//! Control surface: accepts submissions and answers lookups.
//!
//! Every accepted set is registered in a [`SubmissionIndex`] before it is
//! enqueued, so a poll that arrives right after the `202` always finds it.
//! The index is owned by the surface and handed in at construction; there
//! is no process-wide registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rpt_core::{
    DatabaseClient, Job, Operation, OperationOutput, OperationSet, OperationSetOutput, SetStatus,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::lifecycle::ShutdownController;
use crate::queue::{SubmissionQueue, SubmitError};

// ---------------------------------------------------------------------------
// Submission index
// ---------------------------------------------------------------------------

/// Result of resolving an identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LookupResult {
    Set(OperationSetOutput),
    Operation(OperationOutput),
}

/// Concurrent map of set identifier to submitted set.
///
/// Entries are never evicted. The map grows with the number of
/// submissions over the life of the process.
#[derive(Debug, Default)]
pub struct SubmissionIndex {
    sets: DashMap<String, Arc<OperationSet>>,
}

impl SubmissionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, set: Arc<OperationSet>) {
        self.sets.insert(set.id().to_string(), set);
    }

    pub fn remove(&self, set_id: &str) -> Option<Arc<OperationSet>> {
        self.sets.remove(set_id).map(|(_, set)| set)
    }

    #[must_use]
    pub fn get(&self, set_id: &str) -> Option<Arc<OperationSet>> {
        self.sets.get(set_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Resolves `id` as a set identifier first, then as an operation
    /// identifier within any registered set.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<LookupResult> {
        if let Some(set) = self.get(id) {
            return Some(LookupResult::Set(set.output()));
        }
        self.sets.iter().find_map(|entry| {
            entry
                .value()
                .lookup_operation(id)
                .map(|op| LookupResult::Operation(op.output()))
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Summaries of every registered set, oldest first.
    #[must_use]
    pub fn summaries(&self) -> Vec<SetSummary> {
        let mut summaries: Vec<SetSummary> = self
            .sets
            .iter()
            .map(|entry| SetSummary::of(entry.value()))
            .collect();
        summaries.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        summaries
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Identifiers handed back for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubmissionReceipt {
    #[serde(rename = "ID")]
    pub id: String,
    /// Operation identifiers in execution order.
    pub operations: Vec<String>,
}

impl SubmissionReceipt {
    #[must_use]
    pub fn of(set: &OperationSet) -> Self {
        Self {
            id: set.id().to_string(),
            operations: set.operations().iter().map(|op| op.id().to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetSummary {
    #[serde(rename = "ID")]
    pub id: String,
    pub status: SetStatus,
    pub created: DateTime<Utc>,
    pub operations: Vec<String>,
}

impl SetSummary {
    fn of(set: &OperationSet) -> Self {
        Self {
            id: set.id().to_string(),
            status: set.status(),
            created: set.created(),
            operations: set.operations().iter().map(|op| op.id().to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub capacity: usize,
    pub depth: usize,
    pub closed: bool,
}

/// Point-in-time view of the workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub state: &'static str,
    pub in_flight: u64,
    pub queue: QueueSnapshot,
    pub submissions: Vec<SetSummary>,
}

// ---------------------------------------------------------------------------
// Control surface
// ---------------------------------------------------------------------------

/// Which configured database a job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Primary,
    Secondary,
}

/// Front door for submissions and lookups, shared by HTTP handlers and
/// embedding code.
pub struct ControlSurface {
    index: Arc<SubmissionIndex>,
    queue: Arc<SubmissionQueue>,
    shutdown: Arc<ShutdownController>,
    primary: Arc<dyn DatabaseClient>,
    secondary: Arc<dyn DatabaseClient>,
}

impl ControlSurface {
    #[must_use]
    pub fn new(
        index: Arc<SubmissionIndex>,
        queue: Arc<SubmissionQueue>,
        shutdown: Arc<ShutdownController>,
        primary: Arc<dyn DatabaseClient>,
        secondary: Arc<dyn DatabaseClient>,
    ) -> Self {
        Self {
            index,
            queue,
            shutdown,
            primary,
            secondary,
        }
    }

    #[must_use]
    pub fn client(&self, target: Target) -> Arc<dyn DatabaseClient> {
        match target {
            Target::Primary => Arc::clone(&self.primary),
            Target::Secondary => Arc::clone(&self.secondary),
        }
    }

    #[must_use]
    pub fn index(&self) -> &Arc<SubmissionIndex> {
        &self.index
    }

    /// Registers `set` and enqueues it, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// [`SubmitError::ShuttingDown`] once shutdown has been triggered and
    /// [`SubmitError::Closed`] if the queue closed first. A rejected set is
    /// removed from the index again.
    pub async fn submit(&self, set: OperationSet) -> Result<SubmissionReceipt, SubmitError> {
        let _guard = self.shutdown.in_flight_guard();
        if self.shutdown.is_shutting_down() {
            return Err(SubmitError::ShuttingDown);
        }

        let set = Arc::new(set);
        let receipt = SubmissionReceipt::of(&set);
        self.index.insert(Arc::clone(&set));

        if let Err(err) = self.queue.submit(Arc::clone(&set)).await {
            self.index.remove(set.id());
            debug!(set_id = %set.id(), error = %err, "submission rejected");
            return Err(err);
        }

        info!(set_id = %receipt.id, operations = receipt.operations.len(), "operation set queued");
        Ok(receipt)
    }

    /// Wraps `job` in a single-operation set against `target` and submits it.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn submit_job(
        &self,
        target: Target,
        job: Job,
    ) -> Result<SubmissionReceipt, SubmitError> {
        let op = Operation::new(self.client(target), job);
        self.submit(OperationSet::with_operations([op])).await
    }

    /// Resolves a set or operation identifier.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<LookupResult> {
        self.index.find(id)
    }

    #[must_use]
    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            state: self.shutdown.health_state().as_str(),
            in_flight: self.shutdown.in_flight_count(),
            queue: QueueSnapshot {
                capacity: self.queue.capacity(),
                depth: self.queue.depth(),
                closed: self.queue.is_closed(),
            },
            submissions: self.index.summaries(),
        }
    }
}
