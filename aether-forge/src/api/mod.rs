//! API Module
//!
//! Job intake API of the forge. Each submodule handles endpoints for a
//! specific domain.

pub mod deployment;
pub mod error;
pub mod health;
pub mod job;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::scheduler::JobQueue;
use crate::shutdown::ShutdownCoordinator;

/// Shared state for intake handlers
#[derive(Clone)]
pub struct AdminState {
    pub queue: JobQueue,
    pub coordinator: Arc<ShutdownCoordinator>,
}

/// Create the intake API router with all endpoints
pub fn create_router(state: AdminState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/jobs", post(job::enqueue_job))
        .route("/jobs/{id}", get(job::get_job))
        // Deployment endpoints
        .route("/deployments", get(deployment::list_deployments))
        .route("/deployments/{app_id}", delete(deployment::delete_deployment))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
