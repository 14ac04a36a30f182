//! Single-consumer executor for queued operation sets.
//!
//! One background task takes sets off the submission queue in FIFO order
//! and runs each set's operations sequentially, in insertion order. A
//! failed operation is recorded on the operation and does not stop the
//! rest of its set or later sets. When the queue is closed and empty the
//! task exits and raises the drain signal.

use std::sync::Arc;

use rpt_core::OperationSet;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

use crate::observer::SetObserver;

// ---------------------------------------------------------------------------
// DrainSignal
// ---------------------------------------------------------------------------

/// Observes whether the orchestrator has drained the queue and exited.
#[derive(Debug, Clone)]
pub struct DrainSignal {
    rx: watch::Receiver<bool>,
}

impl DrainSignal {
    /// Creates the sender/signal pair. The sender goes to the orchestrator.
    #[must_use]
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    #[must_use]
    pub fn is_drained(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the orchestrator reports it has drained.
    ///
    /// Also resolves if the orchestrator task is gone without reporting,
    /// so shutdown can never wait forever on a dead consumer.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|drained| *drained).await;
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Consumer of the submission queue.
pub struct Orchestrator {
    rx: mpsc::Receiver<Arc<OperationSet>>,
    observer: Arc<dyn SetObserver>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Arc<OperationSet>>, observer: Arc<dyn SetObserver>) -> Self {
        Self { rx, observer }
    }

    /// Processes sets until the queue is closed and empty.
    ///
    /// Returns the number of sets processed.
    pub async fn run(mut self) -> u64 {
        let mut processed = 0u64;
        while let Some(set) = self.rx.recv().await {
            let span = info_span!("operation_set", set_id = %set.id(), operations = set.len());
            process_set(&set).instrument(span).await;
            self.observer.on_set_complete(&set.output());
            processed += 1;
        }
        info!(processed, "submission queue closed and drained");
        processed
    }

    /// Runs on a background task and raises `drained` when the queue is empty.
    #[must_use]
    pub fn spawn(self, drained: watch::Sender<bool>) -> JoinHandle<u64> {
        tokio::spawn(async move {
            let processed = self.run().await;
            let _ = drained.send(true);
            processed
        })
    }
}

/// Runs every operation of `set` once, in insertion order.
pub async fn process_set(set: &OperationSet) {
    debug!("processing operation set");
    for op in set.operations() {
        op.start().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use rpt_core::{Job, Operation, OperationStatus, QueryDataSet, SetStatus};

    use super::*;
    use crate::control::{ControlSurface, SubmissionIndex, Target};
    use crate::lifecycle::ShutdownController;
    use crate::observer::RecordingObserver;
    use crate::queue::SubmissionQueue;
    use crate::testing::StubClient;

    fn read(client: &Arc<StubClient>, query: &str) -> Operation {
        Operation::query(client.clone(), QueryDataSet::new("q", query))
    }

    #[tokio::test]
    async fn runs_sets_in_submission_order() {
        let client = Arc::new(StubClient::default());
        let (queue, rx) = SubmissionQueue::new(8);
        let recorder = Arc::new(RecordingObserver::new());
        let (drained_tx, drained) = DrainSignal::channel();
        let handle = Orchestrator::new(rx, recorder.clone()).spawn(drained_tx);

        let mut ids = Vec::new();
        for i in 0..4 {
            let set = Arc::new(OperationSet::with_operations([
                read(&client, &format!("SELECT {i}a")),
                read(&client, &format!("SELECT {i}b")),
            ]));
            ids.push(set.id().to_string());
            queue.submit(set).await.unwrap();
        }
        queue.close();
        drained.wait().await;

        assert_eq!(handle.await.unwrap(), 4);
        assert!(drained.is_drained());
        assert_eq!(recorder.set_ids(), ids);
        assert_eq!(
            client.queries(),
            vec![
                "SELECT 0a", "SELECT 0b", "SELECT 1a", "SELECT 1b", "SELECT 2a", "SELECT 2b",
                "SELECT 3a", "SELECT 3b"
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_submissions_run_in_enqueue_order() {
        const PRODUCERS: usize = 16;

        let client = Arc::new(StubClient::default().with_delay(Duration::from_millis(1)));
        let (queue, mut queue_rx) = SubmissionQueue::new(2);
        let queue = Arc::new(queue);
        let surface = Arc::new(ControlSurface::new(
            Arc::new(SubmissionIndex::new()),
            Arc::clone(&queue),
            Arc::new(ShutdownController::new()),
            client.clone(),
            client.clone(),
        ));

        // Relay between queue and consumer; the mpsc hands sets over in the
        // order they were enqueued, so the relay sees the enqueue order.
        let (forward_tx, forward_rx) = mpsc::channel(1);
        let relay = tokio::spawn(async move {
            let mut enqueued = Vec::new();
            while let Some(set) = queue_rx.recv().await {
                enqueued.push(set.id().to_string());
                if forward_tx.send(set).await.is_err() {
                    break;
                }
            }
            enqueued
        });

        let recorder = Arc::new(RecordingObserver::new());
        let (drained_tx, drained) = DrainSignal::channel();
        Orchestrator::new(forward_rx, recorder.clone()).spawn(drained_tx);

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|i| {
                let surface = Arc::clone(&surface);
                tokio::spawn(async move {
                    let query = format!("SELECT {i}");
                    let job = Job::Query(QueryDataSet::new("q", query.clone()));
                    let receipt = surface.submit_job(Target::Primary, job).await.unwrap();
                    (receipt.id, query)
                })
            })
            .collect();
        let mut query_of = HashMap::new();
        for producer in producers {
            let (id, query) = producer.await.unwrap();
            query_of.insert(id, query);
        }

        queue.close();
        tokio::time::timeout(Duration::from_secs(5), drained.wait())
            .await
            .unwrap();

        let enqueued = relay.await.unwrap();
        assert_eq!(enqueued.len(), PRODUCERS);
        assert_eq!(recorder.set_ids(), enqueued);
        let expected: Vec<String> = enqueued.iter().map(|id| query_of[id].clone()).collect();
        assert_eq!(client.queries(), expected);
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_set() {
        let client = Arc::new(StubClient::failing_on("SELECT broken", "syntax error"));
        let mut set = OperationSet::new();
        let bad = set.add_operation(read(&client, "SELECT broken"));
        let good = set.add_operation(read(&client, "SELECT 1"));

        process_set(&set).await;

        assert_eq!(bad.status(), OperationStatus::Failed);
        assert_eq!(bad.errors(), vec!["syntax error".to_string()]);
        assert_eq!(good.status(), OperationStatus::Succeeded);
        assert_eq!(set.status(), SetStatus::Complete);
    }

    #[tokio::test]
    async fn operations_within_a_set_never_overlap() {
        let client = Arc::new(StubClient::default().with_delay(Duration::from_millis(20)));
        let mut set = OperationSet::new();
        let first = set.add_operation(read(&client, "SELECT 1"));
        let second = set.add_operation(read(&client, "SELECT 2"));

        process_set(&set).await;

        assert!(first.completed().unwrap() <= second.started().unwrap());
    }

    #[tokio::test]
    async fn drain_signal_fires_when_consumer_is_dropped() {
        let (tx, drained) = DrainSignal::channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), drained.wait())
            .await
            .unwrap();
    }
}
