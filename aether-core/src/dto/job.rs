//! Job intake DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::outcome::JobOutcome;
use crate::domain::state::DeploymentState;

/// Response to `POST /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueuedJob {
    pub job_id: Uuid,
    pub app_id: String,
}

/// Response to `GET /jobs/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: Uuid,
    pub app_id: String,
    pub state: DeploymentState,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub outcome: Option<JobOutcome>,
}

/// A live deployment as reported by `GET /deployments`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    pub app_id: String,
    pub port: u16,
    pub container_id: String,
    pub image_name: String,
    pub proxy_url: String,
    pub deployed_at: chrono::DateTime<chrono::Utc>,
}

/// State-change event pushed to the downstream notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub job_id: Uuid,
    pub app_id: String,
    pub state: DeploymentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Final outcome pushed to the downstream notifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeEvent {
    pub job_id: Uuid,
    pub outcome: JobOutcome,
}
