//! Top-level runtime: assembles queue, orchestrator, lifecycle coordinator
//! and optional HTTP control surface.
//!
//! Startup is deferred like the listener's: [`Rpt::new`] allocates shared
//! state, [`Rpt::start`] spawns the background tasks and binds the
//! listener, and [`Rpt::wait`] blocks until the lifecycle coordinator
//! releases the process. [`Rpt::run`] does all three and also handles
//! Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::Router;
use rpt_core::{DatabaseClient, DbDataSet, Operation, OperationSet, StateChange};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::api::{build_router, ApiServer, AppState};
use crate::config::{ApiConfig, Engine, EndpointConfig, RptConfig, RuntimeConfig};
use crate::control::{ControlSurface, SubmissionIndex, SubmissionReceipt};
use crate::lifecycle::{
    CloseHandle, CloseTimings, KeepAlive, LifecycleCoordinator, ShutdownController,
};
use crate::observer::{CompositeObserver, MetricsObserver, SetObserver, TracingObserver};
use crate::orchestrator::{DrainSignal, Orchestrator};
use crate::queue::{SubmissionQueue, SubmitError};

/// Receivers consumed by [`Rpt::start`].
struct Pending {
    queue_rx: mpsc::Receiver<Arc<OperationSet>>,
    state_rx: mpsc::Receiver<StateChange>,
    drained_tx: watch::Sender<bool>,
}

pub struct Rpt {
    api: Option<ApiConfig>,
    primary: Arc<dyn DatabaseClient>,
    observers: Vec<Arc<dyn SetObserver>>,
    shutdown: Arc<ShutdownController>,
    keep_alive: KeepAlive,
    control: Arc<ControlSurface>,
    close: CloseHandle,
    pending: Option<Pending>,
    orchestrator: Option<JoinHandle<u64>>,
}

impl Rpt {
    /// Allocates every shared component. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        primary: Arc<dyn DatabaseClient>,
        secondary: Arc<dyn DatabaseClient>,
        runtime: &RuntimeConfig,
    ) -> Self {
        let (queue, queue_rx) = SubmissionQueue::new(runtime.queue_capacity);
        let queue = Arc::new(queue);
        let (state_tx, state_rx) = mpsc::channel(runtime.state_capacity.max(1));
        let (drained_tx, drained) = DrainSignal::channel();
        let shutdown = Arc::new(ShutdownController::new());

        let close = CloseHandle::new(
            Arc::clone(&shutdown),
            Arc::clone(&queue),
            state_tx,
            drained,
            CloseTimings::from(runtime),
        );
        let control = Arc::new(ControlSurface::new(
            Arc::new(SubmissionIndex::new()),
            queue,
            Arc::clone(&shutdown),
            Arc::clone(&primary),
            secondary,
        ));

        Self {
            api: None,
            primary,
            observers: vec![Arc::new(TracingObserver), Arc::new(MetricsObserver)],
            shutdown,
            keep_alive: KeepAlive::new(),
            control,
            close,
            pending: Some(Pending {
                queue_rx,
                state_rx,
                drained_tx,
            }),
            orchestrator: None,
        }
    }

    /// Builds clients for both endpoints, connects them and queues the
    /// seed file, if any.
    ///
    /// # Errors
    ///
    /// Fails if a client cannot be built or connected, or the seed file
    /// cannot be imported.
    pub async fn from_config(config: &RptConfig) -> anyhow::Result<Self> {
        let primary = build_client(&config.primary)?;
        let secondary = build_client(&config.secondary)?;
        primary.connect().await.context("connecting primary")?;
        secondary.connect().await.context("connecting secondary")?;

        let mut rpt = Self::new(Arc::clone(&primary), secondary, &config.runtime);
        if let Some(api) = &config.api {
            rpt = rpt.with_api(api.clone());
        }

        if let Some(path) = &config.seed_file {
            let data = DbDataSet::import(path)?;
            info!(path = %path.display(), dataset = %data.name, "queueing seed file");
            rpt.submit(OperationSet::with_operations([Operation::seed(primary, data)]))
                .await?;
        }
        Ok(rpt)
    }

    #[must_use]
    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = Some(api);
        self
    }

    /// Adds an observer notified after each set completes.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SetObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    #[must_use]
    pub fn control(&self) -> Arc<ControlSurface> {
        Arc::clone(&self.control)
    }

    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        self.close.clone()
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Submits a set for execution.
    ///
    /// # Errors
    ///
    /// See [`ControlSurface::submit`].
    pub async fn submit(&self, set: OperationSet) -> Result<SubmissionReceipt, SubmitError> {
        self.control.submit(set).await
    }

    /// Router for `api` without binding a listener.
    #[must_use]
    pub fn router(&self, api: ApiConfig) -> Router {
        build_router(self.app_state(api))
    }

    fn app_state(&self, api: ApiConfig) -> AppState {
        AppState {
            control: Arc::clone(&self.control),
            close: self.close.clone(),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(api),
            start_time: Instant::now(),
        }
    }

    /// Spawns the orchestrator and the lifecycle coordinator, logs the
    /// primary's databases in the background and, if configured, binds and
    /// serves the control surface.
    ///
    /// Returns the bound control-surface address.
    ///
    /// # Errors
    ///
    /// Fails if called twice or the listener cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<Option<SocketAddr>> {
        let pending = self.pending.take().context("runtime already started")?;

        let observer: Arc<dyn SetObserver> =
            Arc::new(CompositeObserver::new(self.observers.clone()));
        self.orchestrator =
            Some(Orchestrator::new(pending.queue_rx, observer).spawn(pending.drained_tx));
        LifecycleCoordinator::new(pending.state_rx, self.keep_alive.clone()).spawn();

        let primary = Arc::clone(&self.primary);
        tokio::spawn(async move {
            match primary.list_databases().await {
                Ok(databases) => info!(%databases, "primary databases"),
                Err(err) => warn!(error = %format!("{err:#}"), "listing primary databases failed"),
            }
        });

        let Some(api) = self.api.clone() else {
            self.shutdown.set_ready();
            return Ok(None);
        };

        let mut server = ApiServer::new(self.app_state(api));
        let addr = server.start().await?;
        tokio::spawn(async move {
            if let Err(err) = server.serve().await {
                error!(error = %format!("{err:#}"), "control surface exited");
            }
        });
        Ok(Some(addr))
    }

    /// Starts the graceful close sequence with the configured grace.
    pub fn close(&self) -> Option<JoinHandle<()>> {
        self.close.close()
    }

    /// Abandons queued work and releases the process.
    pub async fn stop(&self) {
        self.close.stop().await;
    }

    /// Resolves once the lifecycle coordinator releases the process.
    pub async fn wait(&self) {
        self.keep_alive.released().await;
    }

    /// Starts, closes immediately when no control surface is configured,
    /// and waits for release. The first Ctrl-C starts a graceful close, a
    /// second one stops immediately.
    ///
    /// # Errors
    ///
    /// Propagates [`start`](Self::start) failures.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.start().await?;
        if self.api.is_none() {
            info!("control surface disabled; closing once queued work drains");
            self.close.close_with_grace(Duration::ZERO);
        }

        tokio::select! {
            () = self.wait() => {}
            () = forward_interrupts(self.close.clone()) => {}
        }

        if let Some(orchestrator) = self.orchestrator.take() {
            if orchestrator.is_finished() {
                if let Ok(processed) = orchestrator.await {
                    info!(processed, "orchestrator finished");
                }
            }
        }
        info!("rpt exiting");
        Ok(())
    }
}

/// Maps Ctrl-C presses onto close, then stop. Never resolves on its own.
async fn forward_interrupts(close: CloseHandle) {
    let mut presses = 0u32;
    loop {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        presses += 1;
        if presses == 1 {
            info!("interrupt received; closing gracefully (press again to stop)");
            close.close();
        } else {
            warn!("second interrupt received; stopping");
            close.stop().await;
        }
    }
}

fn build_client(endpoint: &EndpointConfig) -> anyhow::Result<Arc<dyn DatabaseClient>> {
    match endpoint.engine {
        #[cfg(feature = "postgres")]
        Engine::Postgres => Ok(Arc::new(crate::postgres::PostgresClient::new(
            endpoint.clone(),
        ))),
        #[cfg(not(feature = "postgres"))]
        Engine::Postgres => anyhow::bail!("built without the `postgres` feature"),
    }
}
