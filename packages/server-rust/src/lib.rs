//! `rpt` server: submission queue, orchestrator, HTTP control surface and
//! lifecycle coordination around the `rpt-core` operation model.

pub mod api;
pub mod config;
pub mod control;
pub mod lifecycle;
pub mod logging;
pub mod observer;
pub mod orchestrator;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod queue;
pub mod runtime;
pub mod testing;

pub use config::{ApiConfig, ConfigError, EndpointConfig, RptArgs, RptConfig, RuntimeConfig};
pub use control::{ControlSurface, LookupResult, SubmissionIndex, SubmissionReceipt, Target};
pub use lifecycle::{CloseHandle, HealthState, LifecycleCoordinator, ShutdownController};
pub use observer::{CompositeObserver, MetricsObserver, SetObserver, TracingObserver};
pub use orchestrator::{process_set, Orchestrator};
#[cfg(feature = "postgres")]
pub use postgres::PostgresClient;
pub use queue::{SubmissionQueue, SubmitError};
pub use runtime::Rpt;
