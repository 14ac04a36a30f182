//! HTTP listener with deferred startup.
//!
//! `new()` captures state, `start()` binds the TCP listener and reports the
//! bound address, `serve()` accepts connections until the shutdown
//! controller fires. Splitting bind from serve lets startup fail fast on a
//! taken port before any work is queued.

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::{build_router, AppState};

pub struct ApiServer {
    state: AppState,
    listener: Option<TcpListener>,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            listener: None,
        }
    }

    #[must_use]
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Binds the configured address. Returns the bound address, which
    /// differs from the configured one when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<SocketAddr> {
        let addr = self.state.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding control surface to {addr}"))?;
        let local = listener.local_addr()?;
        info!(addr = %local, base_path = %self.state.config.base_path, "control surface bound");
        self.listener = Some(listener);
        Ok(local)
    }

    /// Serves until shutdown is triggered, then lets in-flight requests
    /// finish before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server fails.
    pub async fn serve(self) -> anyhow::Result<()> {
        let listener = self
            .listener
            .context("start() must be called before serve()")?;
        let shutdown = self.state.shutdown.clone();
        let router = build_router(self.state);

        shutdown.set_serving(true);
        shutdown.set_ready();
        info!("control surface accepting requests");

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.shutdown_signal())
            .await;

        shutdown.set_serving(false);
        info!("control surface stopped");
        result.context("control surface failed")
    }
}
