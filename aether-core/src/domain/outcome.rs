//! Deployment outcome types
//!
//! The outcome is the terminal record of one pipeline run. It crosses the
//! boundary back to the job system and is not retained by the worker.

use serde::{Deserialize, Serialize};

use crate::domain::job::DeploymentJob;
use crate::domain::state::DeploymentState;

/// Number of trailing characters of build logs carried in an outcome
pub const LOG_TAIL_CHARS: usize = 2000;

const TRUNCATION_MARKER: &str = "[... earlier output truncated ...]\n";

/// Classification of a failed deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentErrorKind {
    /// Source unavailable or credential rejected
    FetchFailure,
    /// Detector rejected the project
    UnsupportedProject,
    /// Port range exhausted
    NoPortsAvailable,
    /// Image build exited non-zero or timed out
    BuildFailure,
    /// Container failed to start or exited right after starting
    RuntimeFailure,
    /// Anything else raised while the pipeline was running
    Internal,
}

/// Successful deployment details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedApp {
    pub app_id: String,
    pub proxy_url: String,
    pub container_id: String,
    pub image_name: String,
    pub port: u16,
    pub build_logs: String,
}

/// Failed deployment details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDeployment {
    pub kind: DeploymentErrorKind,
    pub error: String,
    pub build_logs: String,
}

/// Job output record handed back to the job system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub success: bool,
    pub state: DeploymentState,
    #[serde(default)]
    pub clone_dir: Option<String>,
    pub repo: String,
    pub branch: String,
    pub pr_number: u64,
    pub owner: String,
    pub repo_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<DeploymentErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

impl JobOutcome {
    fn base(job: &DeploymentJob, state: DeploymentState, clone_dir: Option<String>) -> Self {
        Self {
            success: state == DeploymentState::Deployed,
            state,
            clone_dir,
            repo: job.repo.clone(),
            branch: job.branch.clone(),
            pr_number: job.pr_number,
            owner: job.owner.clone(),
            repo_name: job.repo_name.clone(),
            installation_id: job.installation_id,
            comment_id: job.comment_id,
            project_id: job.project_id.clone(),
            deployment_id: job.deployment_id.clone(),
            error: None,
            error_kind: None,
            build_logs: None,
            container_id: None,
            image_name: None,
            port: None,
            proxy_url: None,
            app_id: None,
        }
    }

    /// Builds the outcome of a run that reached `deployed`
    pub fn deployed(job: &DeploymentJob, clone_dir: Option<String>, app: DeployedApp) -> Self {
        let mut outcome = Self::base(job, DeploymentState::Deployed, clone_dir);
        outcome.app_id = Some(app.app_id);
        outcome.proxy_url = Some(app.proxy_url);
        outcome.container_id = Some(app.container_id);
        outcome.image_name = Some(app.image_name);
        outcome.port = Some(app.port);
        outcome.build_logs = non_empty(log_tail(&app.build_logs, LOG_TAIL_CHARS));
        outcome
    }

    /// Builds the outcome of a run that ended in `failed`
    pub fn failed(
        job: &DeploymentJob,
        clone_dir: Option<String>,
        failure: FailedDeployment,
    ) -> Self {
        let mut outcome = Self::base(job, DeploymentState::Failed, clone_dir);
        outcome.error = Some(failure.error);
        outcome.error_kind = Some(failure.kind);
        outcome.build_logs = non_empty(log_tail(&failure.build_logs, LOG_TAIL_CHARS));
        outcome
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

/// Returns at most the last `max_chars` characters of `logs`.
///
/// Truncated output is prefixed with a marker line. Cuts always fall on a
/// char boundary.
pub fn log_tail(logs: &str, max_chars: usize) -> String {
    let total = logs.chars().count();
    if total <= max_chars {
        return logs.to_string();
    }

    let skip = total - max_chars;
    let start = logs
        .char_indices()
        .nth(skip)
        .map(|(idx, _)| idx)
        .unwrap_or(logs.len());

    format!("{}{}", TRUNCATION_MARKER, &logs[start..])
}
