//! Health Check API Handler
//!
//! Status snapshot of every registered app.

use aether_core::dto::proxy::HealthResponse;
use axum::{Json, extract::State};

use crate::api::ProxyState;

/// GET /health
pub async fn health_check(State(state): State<ProxyState>) -> Json<HealthResponse> {
    let apps = state.registry.snapshot();

    Json(HealthResponse {
        status: "ok".to_string(),
        domain: state.registry.config().base_domain.clone(),
        active_apps: apps.len(),
        apps,
    })
}
