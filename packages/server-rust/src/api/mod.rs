//! HTTP control surface: router, shared state, middleware and handlers.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use error::ApiError;
pub use extract::JsonBody;
pub use server::ApiServer;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{any, get, post};
use axum::Router;

use crate::config::ApiConfig;
use crate::control::ControlSurface;
use crate::lifecycle::{CloseHandle, ShutdownController};
use handlers::{
    client_handler, close_handler, delete_handler, health_handler, operation_handler, preflight,
    query_handler, read_handler, readiness_handler, seed_handler, workflow_handler, write_handler,
};
use middleware::build_http_layers;

/// State shared by every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlSurface>,
    pub close: CloseHandle,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<ApiConfig>,
    pub start_time: Instant,
}

/// Assembles every route under the configured base path.
///
/// Routes (relative to the base path):
/// - `GET /health`, `GET /health/ready`
/// - `POST /data/seed`, `/data/read`, `/data/write`, `/data/delete`, `/query`
/// - `GET /operation/{id}`, `GET /workflow`
/// - `POST /close`
/// - `/client/{action}/{target}` (not implemented)
///
/// Every route answers `OPTIONS` with an empty 200. Other methods get 405.
pub fn build_router(state: AppState) -> Router {
    let layers = build_http_layers(&state.config);
    let base_path = state.config.base_path.clone();

    let routes = Router::new()
        .route("/health", get(health_handler).options(preflight))
        .route("/health/ready", get(readiness_handler).options(preflight))
        .route("/data/seed", post(seed_handler).options(preflight))
        .route("/data/read", post(read_handler).options(preflight))
        .route("/data/write", post(write_handler).options(preflight))
        .route("/data/delete", post(delete_handler).options(preflight))
        .route("/query", post(query_handler).options(preflight))
        .route("/operation/{id}", get(operation_handler).options(preflight))
        .route("/workflow", get(workflow_handler).options(preflight))
        .route("/close", post(close_handler).options(preflight))
        .route("/client/{action}/{target}", any(client_handler));

    let router = if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(&base_path, routes)
    };

    router.layer(layers).with_state(state)
}


#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;

    use super::test_support::test_state;
    use super::*;
    use crate::config::normalize_base_path;

    #[tokio::test]
    async fn routes_are_mounted_under_base_path() {
        let router = build_router(test_state().state);
        let response = router
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn empty_base_path_mounts_at_root() {
        let mut t = test_state();
        t.state.config = Arc::new(ApiConfig {
            base_path: normalize_base_path("/"),
            ..ApiConfig::default()
        });
        let router = build_router(t.state);
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn options_is_answered_on_every_route() {
        for path in ["/api/data/seed", "/api/operation/abc", "/api/close", "/api/client/connect/primary"] {
            let response = build_router(test_state().state)
                .oneshot(
                    Request::builder()
                        .method(Method::OPTIONS)
                        .uri(path)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn unlisted_method_is_not_allowed() {
        let response = build_router(test_state().state)
            .oneshot(Request::get("/api/data/seed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
