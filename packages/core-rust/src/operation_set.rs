//! Ordered, identifiable batches of operations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::id::new_guid;
use crate::operation::{Operation, OperationOutput, OperationStatus};

/// Aggregate progress of an operation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetStatus {
    /// No operation has started.
    Pending,
    /// Some operations have started, not all have completed.
    Running,
    /// Every operation has completed (successfully or not).
    Complete,
}

/// Envelope of a whole set, keyed by operation identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationSetOutput {
    #[serde(rename = "ID")]
    pub id: String,
    pub status: SetStatus,
    pub operations: BTreeMap<String, OperationOutput>,
}

/// A named batch of operations executed in insertion order.
///
/// Operations are held both in an ordered sequence and in a lookup index.
/// [`OperationSet::add_operation`] is the only way to add one and it updates
/// both, so the two never disagree. Mutation needs `&mut self`: once a set
/// is submitted it is shared as `Arc<OperationSet>` and its membership is
/// frozen, while each operation's own state stays observable.
#[derive(Debug)]
pub struct OperationSet {
    id: String,
    created: DateTime<Utc>,
    operations: Vec<Arc<Operation>>,
    lookup: HashMap<String, Arc<Operation>>,
}

impl OperationSet {
    /// Creates an empty set with a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: new_guid(),
            created: Utc::now(),
            operations: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Creates a set pre-populated with `operations`, in iteration order.
    #[must_use]
    pub fn with_operations(operations: impl IntoIterator<Item = Operation>) -> Self {
        let mut set = Self::new();
        for op in operations {
            set.add_operation(op);
        }
        set
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Appends `op` and indexes it under its identifier.
    ///
    /// Returns a shared handle to the stored operation.
    pub fn add_operation(&mut self, op: Operation) -> Arc<Operation> {
        let op = Arc::new(op);
        self.lookup.insert(op.id().to_string(), Arc::clone(&op));
        self.operations.push(Arc::clone(&op));
        op
    }

    /// Operations in execution order.
    #[must_use]
    pub fn operations(&self) -> &[Arc<Operation>] {
        &self.operations
    }

    #[must_use]
    pub fn lookup_operation(&self, id: &str) -> Option<&Arc<Operation>> {
        self.lookup.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn status(&self) -> SetStatus {
        let statuses: Vec<OperationStatus> = self.operations.iter().map(|op| op.status()).collect();
        if statuses.iter().all(|s| *s == OperationStatus::Pending) && !statuses.is_empty() {
            SetStatus::Pending
        } else if statuses
            .iter()
            .all(|s| matches!(s, OperationStatus::Succeeded | OperationStatus::Failed))
        {
            SetStatus::Complete
        } else {
            SetStatus::Running
        }
    }

    /// Envelope of every indexed operation plus the set's own identifier.
    #[must_use]
    pub fn output(&self) -> OperationSetOutput {
        OperationSetOutput {
            id: self.id.clone(),
            status: self.status(),
            operations: self
                .lookup
                .iter()
                .map(|(id, op)| (id.clone(), op.output()))
                .collect(),
        }
    }

    /// Requests cancellation of the set.
    ///
    /// Currently a no-op: queued and in-flight operations still run to
    /// completion.
    pub fn cancel(&self) {
        debug!(set_id = %self.id, "cancel requested; operation sets are not cancellable");
    }
}

impl Default for OperationSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;
    use crate::client::testing::{query, RecordingClient};
    use crate::client::DatabaseClient;

    fn client() -> Arc<dyn DatabaseClient> {
        Arc::new(RecordingClient::default())
    }

    #[test]
    fn add_operation_indexes_in_both_structures() {
        let mut set = OperationSet::new();
        let a = set.add_operation(Operation::query(client(), query("a")));
        let b = set.add_operation(Operation::query(client(), query("b")));

        assert_eq!(set.len(), 2);
        assert_eq!(set.operations()[0].id(), a.id());
        assert_eq!(set.operations()[1].id(), b.id());
        assert!(Arc::ptr_eq(set.lookup_operation(a.id()).unwrap(), &a));
        assert!(Arc::ptr_eq(set.lookup_operation(b.id()).unwrap(), &b));
    }

    #[test]
    fn lookup_of_unknown_id_is_none() {
        let set = OperationSet::with_operations([Operation::read(client(), "x")]);
        assert!(set.lookup_operation("missing").is_none());
    }

    #[test]
    fn set_and_operation_ids_differ() {
        let mut set = OperationSet::new();
        let op = set.add_operation(Operation::read(client(), "x"));
        assert_ne!(set.id(), op.id());
    }

    #[test]
    fn empty_set_reports_complete() {
        let set = OperationSet::new();
        assert!(set.is_empty());
        assert_eq!(set.status(), SetStatus::Complete);
        assert!(set.output().operations.is_empty());
    }

    #[tokio::test]
    async fn status_tracks_operation_progress() {
        let set = OperationSet::with_operations([
            Operation::read(client(), "a"),
            Operation::read(client(), "b"),
        ]);
        assert_eq!(set.status(), SetStatus::Pending);

        set.operations()[0].start().await;
        assert_eq!(set.status(), SetStatus::Running);

        set.operations()[1].start().await;
        assert_eq!(set.status(), SetStatus::Complete);
    }

    #[tokio::test]
    async fn output_is_keyed_by_operation_id() {
        let mut set = OperationSet::new();
        let op = set.add_operation(Operation::read(client(), "SELECT 1"));
        op.start().await;

        let output = set.output();
        assert_eq!(output.id, set.id());
        assert_eq!(output.operations.len(), 1);
        assert_eq!(output.operations[op.id()].name, "read_data");

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["ID"], set.id());
        assert!(json["Operations"][op.id()]["Output"]["Errors"].is_array());
    }

    #[test]
    fn cancel_does_not_touch_operations() {
        let set = OperationSet::with_operations([Operation::read(client(), "a")]);
        set.cancel();
        assert_eq!(set.status(), SetStatus::Pending);
        assert_eq!(set.len(), 1);
    }

    proptest! {
        #[test]
        fn sequence_and_index_always_agree(count in 0usize..40) {
            let mut set = OperationSet::new();
            for i in 0..count {
                set.add_operation(Operation::read(client(), format!("SELECT {i}")));
            }

            let ordered: BTreeSet<&str> = set.operations().iter().map(|op| op.id()).collect();
            let indexed: BTreeSet<&str> = set.lookup.keys().map(String::as_str).collect();
            prop_assert_eq!(ordered.len(), count);
            prop_assert_eq!(ordered, indexed);
        }
    }
}
