//! Job tracker
//!
//! Remembers accepted jobs, their latest state and, once finished, their
//! outcome. Backs `GET /jobs/{id}`. Only the most recent finished jobs are
//! kept; jobs still pending or running are never forgotten.

use aether_core::domain::job::DeploymentJob;
use aether_core::domain::outcome::JobOutcome;
use aether_core::domain::state::DeploymentState;
use aether_core::dto::job::JobStatus;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::service::OutcomeNotifier;

/// Finished jobs remembered by default
pub const DEFAULT_JOB_RETENTION: usize = 1000;

#[derive(Debug, Default)]
struct Jobs {
    statuses: HashMap<Uuid, JobStatus>,
    /// Finished job ids, oldest first
    finished: VecDeque<Uuid>,
}

#[derive(Debug)]
pub struct JobTracker {
    jobs: RwLock<Jobs>,
    retention: usize,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_JOB_RETENTION)
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker forgetting finished jobs beyond the `retention` most recent
    pub fn with_retention(retention: usize) -> Self {
        Self {
            jobs: RwLock::new(Jobs::default()),
            retention: retention.max(1),
        }
    }

    /// Records a freshly queued job in `pending`
    pub fn insert(&self, job_id: Uuid, app_id: String) {
        let status = JobStatus {
            job_id,
            app_id,
            state: DeploymentState::Pending,
            enqueued_at: Utc::now(),
            completed_at: None,
            outcome: None,
        };
        self.write().statuses.insert(job_id, status);
    }

    /// Forgets a job that never made it into the queue
    pub fn remove(&self, job_id: Uuid) {
        self.write().statuses.remove(&job_id);
    }

    pub fn set_state(&self, job_id: Uuid, state: DeploymentState) {
        if let Some(status) = self.write().statuses.get_mut(&job_id) {
            status.state = state;
        }
    }

    pub fn complete(&self, job_id: Uuid, outcome: &JobOutcome) {
        let mut jobs = self.write();
        let Some(status) = jobs.statuses.get_mut(&job_id) else {
            return;
        };

        let first_completion = status.completed_at.is_none();
        status.state = outcome.state;
        status.completed_at = Some(Utc::now());
        status.outcome = Some(outcome.clone());

        if first_completion {
            jobs.finished.push_back(job_id);
        }
        while jobs.finished.len() > self.retention {
            if let Some(oldest) = jobs.finished.pop_front() {
                jobs.statuses.remove(&oldest);
            }
        }
    }

    /// Number of jobs currently remembered
    pub fn len(&self) -> usize {
        self.read().statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobStatus> {
        self.read().statuses.get(&job_id).cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Jobs> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Jobs> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OutcomeNotifier for JobTracker {
    async fn state_changed(&self, job_id: Uuid, _job: &DeploymentJob, state: DeploymentState) {
        self.set_state(job_id, state);
    }

    async fn deliver(&self, job_id: Uuid, outcome: &JobOutcome) {
        self.complete(job_id, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_core::domain::outcome::{DeploymentErrorKind, FailedDeployment};

    #[tokio::test]
    async fn test_tracks_job_lifecycle() {
        let tracker = JobTracker::new();
        let job = DeploymentJob::new("t", "o/r", "main", 2);
        let id = Uuid::new_v4();

        tracker.insert(id, job.app_id());
        assert_eq!(tracker.get(id).unwrap().state, DeploymentState::Pending);

        tracker.state_changed(id, &job, DeploymentState::Building).await;
        assert_eq!(tracker.get(id).unwrap().state, DeploymentState::Building);

        let outcome = JobOutcome::failed(
            &job,
            None,
            FailedDeployment {
                kind: DeploymentErrorKind::BuildFailure,
                error: "Build failed".to_string(),
                build_logs: String::new(),
            },
        );
        tracker.deliver(id, &outcome).await;

        let status = tracker.get(id).unwrap();
        assert_eq!(status.state, DeploymentState::Failed);
        assert!(status.completed_at.is_some());
        assert_eq!(status.outcome, Some(outcome));
    }

    #[test]
    fn test_unknown_jobs_are_ignored() {
        let tracker = JobTracker::new();
        let id = Uuid::new_v4();
        tracker.set_state(id, DeploymentState::Cloning);
        assert!(tracker.get(id).is_none());

        tracker.insert(id, "a".to_string());
        tracker.remove(id);
        assert!(tracker.get(id).is_none());
    }

    fn build_failure(job: &DeploymentJob) -> JobOutcome {
        JobOutcome::failed(
            job,
            None,
            FailedDeployment {
                kind: DeploymentErrorKind::BuildFailure,
                error: "Build failed".to_string(),
                build_logs: String::new(),
            },
        )
    }

    #[tokio::test]
    async fn test_oldest_finished_jobs_are_forgotten() {
        let tracker = JobTracker::with_retention(2);
        let job = DeploymentJob::new("t", "o/r", "main", 2);

        let running = Uuid::new_v4();
        tracker.insert(running, job.app_id());
        tracker.state_changed(running, &job, DeploymentState::Building).await;

        let finished: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &finished {
            tracker.insert(*id, job.app_id());
            tracker
                .deliver(*id, &build_failure(&job))
                .await;
        }

        assert!(tracker.get(finished[0]).is_none());
        assert!(tracker.get(finished[1]).is_some());
        assert!(tracker.get(finished[2]).is_some());
        assert_eq!(tracker.get(running).unwrap().state, DeploymentState::Building);
        assert_eq!(tracker.len(), 3);

        // Repeated delivery does not push out another job
        tracker
            .deliver(finished[2], &build_failure(&job))
            .await;
        assert!(tracker.get(finished[1]).is_some());
    }
}
