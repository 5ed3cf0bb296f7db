//! Deployment API Handlers
//!
//! Listing and removal of live deployments.

use aether_core::dto::job::DeploymentSummary;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::api::AdminState;
use crate::api::error::{ApiError, ApiResult};

/// GET /deployments
/// List live deployments
pub async fn list_deployments(State(state): State<AdminState>) -> Json<Vec<DeploymentSummary>> {
    Json(state.coordinator.deployments())
}

/// DELETE /deployments/{app_id}
/// Tear down a live deployment
pub async fn delete_deployment(
    State(state): State<AdminState>,
    Path(app_id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting deployment: {}", app_id);

    match state.coordinator.teardown_app(&app_id).await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::NotFound(format!(
            "Deployment {} not found",
            app_id
        ))),
    }
}
