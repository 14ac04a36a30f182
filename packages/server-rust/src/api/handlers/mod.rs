//! Request handlers for the control surface.

pub mod admin;
pub mod data;
pub mod health;
pub mod lookup;

pub use admin::{client_handler, close_handler};
pub use data::{delete_handler, query_handler, read_handler, seed_handler, write_handler};
pub use health::{health_handler, readiness_handler};
pub use lookup::{operation_handler, workflow_handler};

use axum::http::StatusCode;

/// Empty 200 for `OPTIONS` requests that are not CORS preflights.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}
