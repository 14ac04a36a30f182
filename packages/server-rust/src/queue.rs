//! Bounded FIFO of submitted operation sets.
//!
//! Producers hold a [`SubmissionQueue`]; the single consumer owns the
//! matching `mpsc::Receiver`. Closing drops the queue's sender so the
//! consumer sees end-of-stream once every already-queued set is taken.
//! A submission after close is rejected with [`SubmitError::Closed`] and
//! never panics.

use std::sync::Arc;

use parking_lot::RwLock;
use rpt_core::OperationSet;
use tokio::sync::mpsc;

/// Why a submission was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The queue no longer accepts submissions.
    #[error("submission queue is closed")]
    Closed,
    /// The process is shutting down and no longer takes new work.
    #[error("server is shutting down")]
    ShuttingDown,
}

/// Producer side of the submission queue.
#[derive(Debug)]
pub struct SubmissionQueue {
    tx: RwLock<Option<mpsc::Sender<Arc<OperationSet>>>>,
    capacity: usize,
}

impl SubmissionQueue {
    /// Creates a queue holding at most `capacity` sets (minimum 1) and
    /// returns it with the consumer's receiver.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<OperationSet>>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: RwLock::new(Some(tx)),
                capacity,
            },
            rx,
        )
    }

    /// Enqueues `set`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Closed`] if the queue was closed before the set
    /// could be accepted.
    pub async fn submit(&self, set: Arc<OperationSet>) -> Result<(), SubmitError> {
        // Clone the sender so the lock is not held across the await.
        let tx = self.tx.read().clone().ok_or(SubmitError::Closed)?;
        tx.send(set).await.map_err(|_| SubmitError::Closed)
    }

    /// Stops accepting submissions. Returns `false` if already closed.
    ///
    /// A producer blocked in [`submit`](Self::submit) still holds a sender
    /// clone; its set is delivered before the consumer sees end-of-stream.
    pub fn close(&self) -> bool {
        self.tx.write().take().is_some()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now; zero once closed.
    #[must_use]
    pub fn available(&self) -> usize {
        self.tx.read().as_ref().map_or(0, mpsc::Sender::capacity)
    }

    /// Sets waiting for the consumer. Unknown (reported as zero) once closed.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.tx
            .read()
            .as_ref()
            .map_or(0, |tx| self.capacity.saturating_sub(tx.capacity()))
    }
}
