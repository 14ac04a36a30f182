//! Process lifecycle: health state, in-flight tracking, state-change
//! signals and the ordered close sequence.
//!
//! Shutdown is driven by [`StateChange`] signals on a bounded channel that
//! only the [`LifecycleCoordinator`] reads:
//!
//! - `stop` releases the process immediately, abandoning queued work.
//! - `process_then_stop` marks that shutdown is pending; the process keeps
//!   running while the orchestrator drains the queue.
//! - `processing_complete` releases the process, but only after a
//!   `process_then_stop` was seen. On its own it is ignored.
//!
//! [`CloseHandle`] runs the graceful sequence that produces those signals.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rpt_core::StateChange;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::orchestrator::DrainSignal;
use crate::queue::SubmissionQueue;

// ---------------------------------------------------------------------------
// Health state and shutdown controller
// ---------------------------------------------------------------------------

/// Process health, advanced by the [`ShutdownController`].
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Components are being assembled.
    Starting,
    /// Accepting submissions.
    Ready,
    /// Close requested; the listener is stopping and no new work is taken.
    Draining,
    /// Every in-flight submission has finished.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates the HTTP listener's shutdown with in-flight submissions.
///
/// 1. Health probes read [`health_state`](Self::health_state).
/// 2. Submissions hold an [`InFlightGuard`] while they enqueue.
/// 3. [`trigger_shutdown`](Self::trigger_shutdown) moves to `Draining` and
///    signals the listener.
/// 4. [`wait_for_listener_stop`](Self::wait_for_listener_stop) and
///    [`wait_for_drain`](Self::wait_for_drain) confirm nothing can still
///    reach the queue.
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    serving: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    health_state: ArcSwap<HealthState>,
    closing: AtomicBool,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_signal, _) = watch::channel(false);
        let (serving, _) = watch::channel(false);
        Self {
            shutdown_signal,
            serving,
            in_flight: Arc::new(AtomicU64::new(0)),
            health_state: ArcSwap::from_pointee(HealthState::Starting),
            closing: AtomicBool::new(false),
        }
    }

    /// Moves `Starting` to `Ready`. Has no effect once shutdown began.
    pub fn set_ready(&self) {
        if self.health_state() == HealthState::Starting {
            self.health_state.store(Arc::new(HealthState::Ready));
        }
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// `true` once shutdown has been triggered.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self.health_state(),
            HealthState::Draining | HealthState::Stopped
        )
    }

    /// Claims the close sequence. Only the first caller gets `true`.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// A receiver that flips to `true` when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Resolves when shutdown is triggered. Suitable for
    /// `with_graceful_shutdown`.
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_receiver();
        async move {
            let _ = rx.wait_for(|triggered| *triggered).await;
        }
    }

    /// Moves to `Draining` and signals every shutdown receiver.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        self.shutdown_signal.send_replace(true);
    }

    /// Marks whether an HTTP listener is serving.
    pub fn set_serving(&self, serving: bool) {
        self.serving.send_replace(serving);
    }

    #[must_use]
    pub fn is_serving(&self) -> bool {
        *self.serving.borrow()
    }

    /// Waits until no listener is serving, up to `timeout`.
    ///
    /// Returns immediately when no listener was ever started. Returns
    /// `false` if the timeout expired.
    pub async fn wait_for_listener_stop(&self, timeout: Duration) -> bool {
        let mut rx = self.serving.subscribe();
        let stopped = tokio::time::timeout(timeout, rx.wait_for(|serving| !*serving))
            .await
            .is_ok();
        stopped
    }

    /// Tracks one in-flight submission until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits for in-flight submissions to finish, up to `timeout`.
    ///
    /// Returns `true` and moves to `Stopped` on success. On timeout the
    /// state stays `Draining`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                self.health_state.store(Arc::new(HealthState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Keep-alive
// ---------------------------------------------------------------------------

/// Holds the process open until released.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    tx: Arc<watch::Sender<bool>>,
}

impl KeepAlive {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn release(&self) {
        self.tx.send_replace(false);
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`release`](Self::release) has been called.
    pub async fn released(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|alive| !*alive).await;
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Lifecycle coordinator
// ---------------------------------------------------------------------------

/// Why the coordinator released the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorExit {
    /// `stop` received.
    Stopped,
    /// `processing_complete` received after `process_then_stop`.
    Drained,
    /// Every signal sender was dropped.
    ChannelClosed,
}

/// Pure transition logic of the coordinator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorState {
    waiting_for_shutdown: bool,
}

impl CoordinatorState {
    #[must_use]
    pub fn waiting_for_shutdown(self) -> bool {
        self.waiting_for_shutdown
    }

    /// Applies one signal. Returns the exit reason if the process should
    /// be released.
    pub fn apply(&mut self, signal: StateChange) -> Option<CoordinatorExit> {
        match signal {
            StateChange::Stop => Some(CoordinatorExit::Stopped),
            StateChange::ProcessThenStop => {
                self.waiting_for_shutdown = true;
                None
            }
            StateChange::ProcessingComplete if self.waiting_for_shutdown => {
                Some(CoordinatorExit::Drained)
            }
            StateChange::ProcessingComplete => None,
        }
    }
}

/// Sole reader of the state-change channel.
pub struct LifecycleCoordinator {
    rx: mpsc::Receiver<StateChange>,
    keep_alive: KeepAlive,
    state: CoordinatorState,
}

impl LifecycleCoordinator {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<StateChange>, keep_alive: KeepAlive) -> Self {
        Self {
            rx,
            keep_alive,
            state: CoordinatorState::default(),
        }
    }

    /// Consumes signals until one releases the process, then releases the
    /// keep-alive.
    pub async fn run(mut self) -> CoordinatorExit {
        let exit = loop {
            let Some(signal) = self.rx.recv().await else {
                break CoordinatorExit::ChannelClosed;
            };
            debug!(signal = %signal, "state change received");
            if let Some(exit) = self.state.apply(signal) {
                break exit;
            }
            if signal == StateChange::ProcessingComplete {
                debug!("processing_complete ignored; no shutdown pending");
            } else {
                info!("shutdown pending; draining queued work");
            }
        };

        match exit {
            CoordinatorExit::Stopped => warn!("stop received; abandoning queued work"),
            CoordinatorExit::Drained => info!("processing complete; releasing process"),
            CoordinatorExit::ChannelClosed => warn!("state channel closed; releasing process"),
        }
        self.keep_alive.release();
        exit
    }

    #[must_use]
    pub fn spawn(self) -> JoinHandle<CoordinatorExit> {
        tokio::spawn(self.run())
    }
}

// ---------------------------------------------------------------------------
// Close sequence
// ---------------------------------------------------------------------------

/// Timing of the close sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseTimings {
    pub grace: Duration,
    pub listener_stop_timeout: Duration,
    pub submission_drain_timeout: Duration,
}

impl From<&RuntimeConfig> for CloseTimings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            grace: config.close_grace,
            listener_stop_timeout: config.listener_stop_timeout,
            submission_drain_timeout: config.submission_drain_timeout,
        }
    }
}

/// Starts the graceful close sequence or an immediate stop.
#[derive(Clone)]
pub struct CloseHandle {
    shutdown: Arc<ShutdownController>,
    queue: Arc<SubmissionQueue>,
    state_tx: mpsc::Sender<StateChange>,
    drained: DrainSignal,
    timings: CloseTimings,
}

impl CloseHandle {
    #[must_use]
    pub fn new(
        shutdown: Arc<ShutdownController>,
        queue: Arc<SubmissionQueue>,
        state_tx: mpsc::Sender<StateChange>,
        drained: DrainSignal,
        timings: CloseTimings,
    ) -> Self {
        Self {
            shutdown,
            queue,
            state_tx,
            drained,
            timings,
        }
    }

    /// Starts the close sequence with the configured grace period.
    ///
    /// Returns `None` when a close is already in progress.
    pub fn close(&self) -> Option<JoinHandle<()>> {
        self.close_with_grace(self.timings.grace)
    }

    /// Starts the close sequence with an explicit grace period.
    pub fn close_with_grace(&self, grace: Duration) -> Option<JoinHandle<()>> {
        if !self.shutdown.begin_close() {
            debug!("close already in progress");
            return None;
        }
        info!(grace_ms = grace.as_millis(), "close requested");
        let this = self.clone();
        Some(tokio::spawn(async move { this.run_sequence(grace).await }))
    }

    /// Requests an immediate stop, abandoning queued work.
    pub async fn stop(&self) {
        self.send(StateChange::Stop).await;
    }

    /// Ordered shutdown:
    ///
    /// 1. wait out the grace period so the close response is delivered
    /// 2. stop the listener and wait for it
    /// 3. wait for submissions already past the listener
    /// 4. close the queue
    /// 5. signal `process_then_stop`
    /// 6. wait for the orchestrator to drain the queue
    /// 7. signal `processing_complete`
    async fn run_sequence(self, grace: Duration) {
        tokio::time::sleep(grace).await;

        self.shutdown.trigger_shutdown();
        if !self
            .shutdown
            .wait_for_listener_stop(self.timings.listener_stop_timeout)
            .await
        {
            warn!("listener did not stop in time; closing the queue anyway");
        }
        if !self
            .shutdown
            .wait_for_drain(self.timings.submission_drain_timeout)
            .await
        {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "submissions still in flight; they complete before the queue drains"
            );
        }

        self.queue.close();
        info!("submission queue closed");
        self.send(StateChange::ProcessThenStop).await;

        self.drained.wait().await;
        self.send(StateChange::ProcessingComplete).await;
    }

    async fn send(&self, signal: StateChange) {
        if self.state_tx.send(signal).await.is_err() {
            debug!(signal = %signal, "lifecycle coordinator already exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use rpt_core::OperationSet;

    use super::*;

    // -- ShutdownController ------------------------------------------------

    #[test]
    fn health_state_transitions_starting_ready_draining() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);

        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);

        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
        assert!(controller.is_shutting_down());

        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Draining);
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let controller = ShutdownController::new();
        let a = controller.in_flight_guard();
        let b = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);
        drop(a);
        drop(b);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[test]
    fn begin_close_only_succeeds_once() {
        let controller = ShutdownController::new();
        assert!(controller.begin_close());
        assert!(!controller.begin_close());
        assert!(controller.is_closing());
    }

    #[tokio::test]
    async fn shutdown_signal_resolves_after_trigger() {
        let controller = ShutdownController::new();
        let signal = controller.shutdown_signal();
        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_times_out_with_active_guard() {
        let controller = ShutdownController::new();
        let _guard = controller.in_flight_guard();
        controller.trigger_shutdown();
        assert!(!controller.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(controller.health_state(), HealthState::Draining);
    }

    #[tokio::test]
    async fn wait_for_drain_succeeds_when_guard_drops() {
        let controller = Arc::new(ShutdownController::new());
        let guard = controller.in_flight_guard();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(guard);
        });
        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }

    #[tokio::test]
    async fn listener_stop_is_immediate_without_listener() {
        let controller = ShutdownController::new();
        assert!(controller.wait_for_listener_stop(Duration::from_millis(10)).await);

        controller.set_serving(true);
        assert!(!controller.wait_for_listener_stop(Duration::from_millis(10)).await);
        controller.set_serving(false);
        assert!(controller.wait_for_listener_stop(Duration::from_millis(10)).await);
    }

    // -- Coordinator -------------------------------------------------------

    #[test]
    fn processing_complete_alone_is_ignored() {
        let mut state = CoordinatorState::default();
        assert_eq!(state.apply(StateChange::ProcessingComplete), None);
        assert!(!state.waiting_for_shutdown());
    }

    #[test]
    fn graceful_sequence_releases_on_processing_complete() {
        let mut state = CoordinatorState::default();
        assert_eq!(state.apply(StateChange::ProcessThenStop), None);
        assert!(state.waiting_for_shutdown());
        assert_eq!(
            state.apply(StateChange::ProcessingComplete),
            Some(CoordinatorExit::Drained)
        );
    }

    #[test]
    fn stop_releases_immediately() {
        let mut state = CoordinatorState::default();
        assert_eq!(state.apply(StateChange::Stop), Some(CoordinatorExit::Stopped));

        let mut state = CoordinatorState::default();
        state.apply(StateChange::ProcessThenStop);
        assert_eq!(state.apply(StateChange::Stop), Some(CoordinatorExit::Stopped));
    }

    #[tokio::test]
    async fn coordinator_keeps_process_alive_until_drained() {
        let (tx, rx) = mpsc::channel(3);
        let keep_alive = KeepAlive::new();
        let handle = LifecycleCoordinator::new(rx, keep_alive.clone()).spawn();

        tx.send(StateChange::ProcessingComplete).await.unwrap();
        tx.send(StateChange::ProcessThenStop).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(keep_alive.is_alive());

        tx.send(StateChange::ProcessingComplete).await.unwrap();
        assert_eq!(handle.await.unwrap(), CoordinatorExit::Drained);
        assert!(!keep_alive.is_alive());
        keep_alive.released().await;
    }

    #[tokio::test]
    async fn coordinator_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel::<StateChange>(3);
        let keep_alive = KeepAlive::new();
        let handle = LifecycleCoordinator::new(rx, keep_alive.clone()).spawn();
        drop(tx);
        assert_eq!(handle.await.unwrap(), CoordinatorExit::ChannelClosed);
        assert!(!keep_alive.is_alive());
    }

    // -- Close sequence ----------------------------------------------------

    struct Harness {
        close: CloseHandle,
        shutdown: Arc<ShutdownController>,
        queue: Arc<SubmissionQueue>,
        state_rx: mpsc::Receiver<StateChange>,
        drained_tx: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        let shutdown = Arc::new(ShutdownController::new());
        let (queue, _rx) = SubmissionQueue::new(4);
        let queue = Arc::new(queue);
        let (state_tx, state_rx) = mpsc::channel(3);
        let (drained_tx, drained) = DrainSignal::channel();
        let close = CloseHandle::new(
            Arc::clone(&shutdown),
            Arc::clone(&queue),
            state_tx,
            drained,
            CloseTimings {
                grace: Duration::ZERO,
                listener_stop_timeout: Duration::from_millis(100),
                submission_drain_timeout: Duration::from_millis(100),
            },
        );
        Harness {
            close,
            shutdown,
            queue,
            state_rx,
            drained_tx,
        }
    }

    #[tokio::test]
    async fn close_sequence_signals_in_order() {
        let mut h = harness();
        let sequence = h.close.close().unwrap();

        assert_eq!(h.state_rx.recv().await, Some(StateChange::ProcessThenStop));
        assert!(h.queue.is_closed());
        assert_eq!(h.shutdown.health_state(), HealthState::Stopped);
        assert_eq!(
            h.queue.submit(Arc::new(OperationSet::new())).await,
            Err(crate::queue::SubmitError::Closed)
        );

        h.drained_tx.send_replace(true);
        assert_eq!(h.state_rx.recv().await, Some(StateChange::ProcessingComplete));
        sequence.await.unwrap();
    }

    #[tokio::test]
    async fn processing_complete_waits_for_drain() {
        let mut h = harness();
        h.close.close().unwrap();

        assert_eq!(h.state_rx.recv().await, Some(StateChange::ProcessThenStop));
        let early = tokio::time::timeout(Duration::from_millis(50), h.state_rx.recv()).await;
        assert!(early.is_err());

        h.drained_tx.send_replace(true);
        assert_eq!(h.state_rx.recv().await, Some(StateChange::ProcessingComplete));
    }

    #[tokio::test]
    async fn second_close_is_a_no_op() {
        let h = harness();
        assert!(h.close.close().is_some());
        assert!(h.close.close().is_none());
    }

    #[tokio::test]
    async fn stop_sends_stop() {
        let mut h = harness();
        h.close.stop().await;
        assert_eq!(h.state_rx.recv().await, Some(StateChange::Stop));
    }
}
