//! Job queue
//!
//! Bounded in-process queue between job intake and the worker.

use aether_core::domain::job::DeploymentJob;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::scheduler::tracker::JobTracker;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is full")]
    Full,
    #[error("job queue is closed")]
    Closed,
}

/// A job waiting for a worker slot
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: DeploymentJob,
}

/// Sending half of the queue; cheap to clone
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    tracker: Arc<JobTracker>,
}

pub type JobReceiver = mpsc::Receiver<QueuedJob>;

impl JobQueue {
    pub fn new(capacity: usize, tracker: Arc<JobTracker>) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, tracker }, receiver)
    }

    /// Queues `job` without waiting and returns its id
    pub fn enqueue(&self, job: DeploymentJob) -> Result<Uuid, QueueError> {
        let id = Uuid::new_v4();
        self.tracker.insert(id, job.app_id());

        match self.sender.try_send(QueuedJob { id, job }) {
            Ok(()) => Ok(id),
            Err(e) => {
                self.tracker.remove(id);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => QueueError::Full,
                    mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
                })
            }
        }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }
}
