//! Completion observers for operation sets.
//!
//! The orchestrator notifies a [`SetObserver`] after every operation in a
//! set has run. [`CompositeObserver`] fans one notification out to several
//! observers, so logging, metrics and test recorders stay independent.

use std::sync::Arc;

use parking_lot::Mutex;
use rpt_core::{clamped_duration, OperationSetOutput, OperationStatus};
use tracing::{info, warn};

/// Reacts to a completed operation set.
///
/// Used as `Arc<dyn SetObserver>`. Implementations run on the orchestrator
/// task and must not block.
pub trait SetObserver: Send + Sync {
    fn on_set_complete(&self, output: &OperationSetOutput);
}

/// Fans out notifications to every registered observer, in order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn SetObserver>>,
}

impl CompositeObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn SetObserver>>) -> Self {
        Self { observers }
    }

    pub fn add(&mut self, observer: Arc<dyn SetObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl SetObserver for CompositeObserver {
    fn on_set_complete(&self, output: &OperationSetOutput) {
        for observer in &self.observers {
            observer.on_set_complete(output);
        }
    }
}

/// Logs the serialized envelope of each completed set.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SetObserver for TracingObserver {
    fn on_set_complete(&self, output: &OperationSetOutput) {
        let failed = output
            .operations
            .values()
            .filter(|op| op.status == OperationStatus::Failed)
            .count();

        match serde_json::to_string(output) {
            Ok(envelope) => info!(
                set_id = %output.id,
                operations = output.operations.len(),
                failed,
                %envelope,
                "operation set complete"
            ),
            Err(err) => warn!(set_id = %output.id, error = %err, "failed to serialize set envelope"),
        }
    }
}

/// Records operation counts and durations through the `metrics` facade.
///
/// Without an installed recorder every call is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl SetObserver for MetricsObserver {
    fn on_set_complete(&self, output: &OperationSetOutput) {
        metrics::counter!("rpt_operation_sets_total").increment(1);

        for op in output.operations.values() {
            let outcome = match op.status {
                OperationStatus::Succeeded => "succeeded",
                OperationStatus::Failed => "failed",
                OperationStatus::Pending | OperationStatus::Running => continue,
            };
            metrics::counter!(
                "rpt_operations_total",
                "operation" => op.name.clone(),
                "outcome" => outcome,
            )
            .increment(1);

            if let (Some(started), Some(completed)) = (op.started, op.completed) {
                metrics::histogram!("rpt_operation_duration_seconds", "operation" => op.name.clone())
                    .record(clamped_duration(started, completed).as_secs_f64());
            }
        }
    }
}

/// Keeps every envelope it receives. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    outputs: Mutex<Vec<OperationSetOutput>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes received so far, in completion order.
    #[must_use]
    pub fn outputs(&self) -> Vec<OperationSetOutput> {
        self.outputs.lock().clone()
    }

    /// Set identifiers received so far, in completion order.
    #[must_use]
    pub fn set_ids(&self) -> Vec<String> {
        self.outputs.lock().iter().map(|o| o.id.clone()).collect()
    }
}

impl SetObserver for RecordingObserver {
    fn on_set_complete(&self, output: &OperationSetOutput) {
        self.outputs.lock().push(output.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rpt_core::SetStatus;

    use super::*;

    struct Counting(AtomicUsize);

    impl SetObserver for Counting {
        fn on_set_complete(&self, _output: &OperationSetOutput) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn envelope(id: &str) -> OperationSetOutput {
        OperationSetOutput {
            id: id.to_string(),
            status: SetStatus::Complete,
            operations: BTreeMap::new(),
        }
    }

    #[test]
    fn composite_notifies_every_observer() {
        let a = Arc::new(Counting(AtomicUsize::new(0)));
        let b = Arc::new(Counting(AtomicUsize::new(0)));
        let mut composite = CompositeObserver::new(vec![a.clone()]);
        composite.add(b.clone());
        assert_eq!(composite.len(), 2);

        composite.on_set_complete(&envelope("s1"));
        composite.on_set_complete(&envelope("s2"));

        assert_eq!(a.0.load(Ordering::SeqCst), 2);
        assert_eq!(b.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn recording_observer_keeps_completion_order() {
        let recorder = RecordingObserver::new();
        recorder.on_set_complete(&envelope("first"));
        recorder.on_set_complete(&envelope("second"));
        assert_eq!(recorder.set_ids(), vec!["first", "second"]);
    }

    #[test]
    fn tracing_and_metrics_observers_accept_empty_sets() {
        TracingObserver.on_set_complete(&envelope("empty"));
        MetricsObserver.on_set_complete(&envelope("empty"));
    }
}
