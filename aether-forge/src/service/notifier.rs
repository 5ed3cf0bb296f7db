//! Notification service
//!
//! Reports per-step state changes and final outcomes to whoever consumes
//! them: the log, the in-process job tracker, and optionally an HTTP
//! callback that posts PR comments and persists deployment records.

use aether_core::domain::job::DeploymentJob;
use aether_core::domain::outcome::JobOutcome;
use aether_core::domain::state::DeploymentState;
use aether_core::dto::job::{OutcomeEvent, StatusEvent};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Service trait for downstream notifications.
///
/// Delivery is best effort: implementations log failures instead of
/// returning them, since a lost notification must not fail a deployment.
#[async_trait]
pub trait OutcomeNotifier: Send + Sync {
    /// Called once per state the run enters
    async fn state_changed(&self, job_id: Uuid, job: &DeploymentJob, state: DeploymentState);

    /// Called exactly once with the run's terminal outcome
    async fn deliver(&self, job_id: Uuid, outcome: &JobOutcome);
}

/// Writes notifications to the tracing log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl OutcomeNotifier for LogNotifier {
    async fn state_changed(&self, job_id: Uuid, job: &DeploymentJob, state: DeploymentState) {
        info!(%job_id, app_id = %job.app_id(), "Job {} is {}", job_id, state);
    }

    async fn deliver(&self, job_id: Uuid, outcome: &JobOutcome) {
        if outcome.success {
            info!(
                %job_id,
                "Deployment of {} ({}) live at {}",
                outcome.repo,
                outcome.branch,
                outcome.proxy_url.as_deref().unwrap_or_default()
            );
        } else {
            warn!(
                %job_id,
                "Deployment of {} ({}) failed: {}",
                outcome.repo,
                outcome.branch,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Posts notifications as JSON to `<base>/status` and `<base>/outcome`
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: serde::Serialize + Sync>(&self, path: &str, body: &T) {
        let url = format!("{}/{}", self.base_url, path);
        match self.client.post(&url).json(body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => warn!("Callback {} answered {}", url, response.status()),
            Err(e) => warn!("Callback {} failed: {}", url, e),
        }
    }
}

#[async_trait]
impl OutcomeNotifier for HttpNotifier {
    async fn state_changed(&self, job_id: Uuid, job: &DeploymentJob, state: DeploymentState) {
        let event = StatusEvent {
            job_id,
            app_id: job.app_id(),
            state,
            project_id: job.project_id.clone(),
            deployment_id: job.deployment_id.clone(),
            timestamp: chrono::Utc::now(),
        };
        self.post("status", &event).await;
    }

    async fn deliver(&self, job_id: Uuid, outcome: &JobOutcome) {
        let event = OutcomeEvent {
            job_id,
            outcome: outcome.clone(),
        };
        self.post("outcome", &event).await;
    }
}

/// Fans every notification out to a list of notifiers, in order
#[derive(Clone, Default)]
pub struct NotifierSet {
    notifiers: Vec<Arc<dyn OutcomeNotifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn OutcomeNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }
}

#[async_trait]
impl OutcomeNotifier for NotifierSet {
    async fn state_changed(&self, job_id: Uuid, job: &DeploymentJob, state: DeploymentState) {
        for notifier in &self.notifiers {
            notifier.state_changed(job_id, job, state).await;
        }
    }

    async fn deliver(&self, job_id: Uuid, outcome: &JobOutcome) {
        for notifier in &self.notifiers {
            notifier.deliver(job_id, outcome).await;
        }
    }
}
