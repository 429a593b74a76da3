//! API Module
//!
//! HTTP and WebSocket layer for the miner.

pub mod error;
pub mod executor;
pub mod health;
pub mod validator;

use axum::{
    Router,
    routing::{get, post},
};
use horde_core::protocol::EXECUTOR_INTERFACE_PATH;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::service::{JobTracker, SessionRegistry};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<JobTracker>,
    pub sessions: SessionRegistry,
    pub payload_poll_interval: Duration,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Executor interface
        .route(
            &format!("/{}/{{token}}", EXECUTOR_INTERFACE_PATH),
            get(executor::executor_interface),
        )
        // Validator endpoints
        .route("/validators", post(validator::register_validator))
        .route("/validators/{public_key}/jobs", post(validator::accept_job))
        .route(
            "/validators/{public_key}/jobs/active",
            get(validator::list_active_jobs),
        )
        .route(
            "/validators/{public_key}/jobs/unreported",
            get(validator::list_unreported_jobs),
        )
        .route(
            "/validators/{public_key}/jobs/{job_uuid}",
            get(validator::get_job),
        )
        .route(
            "/validators/{public_key}/jobs/{job_uuid}/payload",
            post(validator::submit_payload),
        )
        .route(
            "/validators/{public_key}/jobs/{job_uuid}/reject",
            post(validator::reject_job),
        )
        .route(
            "/validators/{public_key}/jobs/{job_uuid}/reported",
            post(validator::acknowledge_result),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
