//! Deployment worker
//!
//! Pulls jobs off the queue and runs each through the pipeline in its own
//! task, at most `max_parallel_jobs` at a time. Stops taking jobs when the
//! shutdown signal flips and aborts whatever is still running; the aborted
//! runs' ledgers stay with the coordinator, which unwinds them.

use aether_core::domain::job::DeploymentJob;
use aether_core::domain::outcome::{DeploymentErrorKind, FailedDeployment, JobOutcome};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::pipeline::DeploymentPipeline;
use crate::scheduler::queue::{JobReceiver, QueuedJob};
use crate::service::OutcomeNotifier;

pub struct Worker {
    receiver: JobReceiver,
    pipeline: Arc<DeploymentPipeline>,
    notifier: Arc<dyn OutcomeNotifier>,
    semaphore: Arc<Semaphore>,
}

impl Worker {
    pub fn new(
        receiver: JobReceiver,
        pipeline: Arc<DeploymentPipeline>,
        notifier: Arc<dyn OutcomeNotifier>,
        max_parallel_jobs: usize,
    ) -> Self {
        Self {
            receiver,
            pipeline,
            notifier,
            semaphore: Arc::new(Semaphore::new(max_parallel_jobs)),
        }
    }

    /// Runs until `shutdown` becomes `true` or every queue sender is gone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting deployment worker ({} parallel job(s))",
            self.semaphore.available_permits()
        );

        let mut tasks = JoinSet::new();

        loop {
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    warn!("Deployment task ended abnormally: {}", e);
                }
            }

            let permit = tokio::select! {
                _ = wait_for(&mut shutdown) => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let queued = tokio::select! {
                _ = wait_for(&mut shutdown) => break,
                queued = self.receiver.recv() => match queued {
                    Some(queued) => queued,
                    None => {
                        debug!("Job queue closed");
                        break;
                    }
                },
            };

            info!(job_id = %queued.id, "Picked up job for {}", queued.job.repo);
            tasks.spawn(Self::execute_job(
                queued,
                self.pipeline.clone(),
                self.notifier.clone(),
                permit,
            ));
        }

        if !tasks.is_empty() {
            info!("Aborting {} in-flight deployment(s)", tasks.len());
        }
        tasks.shutdown().await;
        self.receiver.close();
        info!("Deployment worker stopped");
    }

    /// Runs one job and delivers its outcome
    async fn execute_job(
        queued: QueuedJob,
        pipeline: Arc<DeploymentPipeline>,
        notifier: Arc<dyn OutcomeNotifier>,
        _permit: OwnedSemaphorePermit,
    ) {
        let QueuedJob { id, job } = queued;

        let outcome = match AssertUnwindSafe(pipeline.run(id, &job)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(job_id = %id, "Deployment task panicked, releasing its resources");
                let diagnostics = pipeline.coordinator().abort_run(id).await;
                panicked_outcome(&job, diagnostics)
            }
        };

        notifier.deliver(id, &outcome).await;
        // Permit is released when dropped
    }
}

async fn wait_for(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender counts as shutdown
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn panicked_outcome(job: &DeploymentJob, diagnostics: Vec<String>) -> JobOutcome {
    JobOutcome::failed(
        job,
        None,
        FailedDeployment {
            kind: DeploymentErrorKind::Internal,
            error: "Deployment task panicked".to_string(),
            build_logs: diagnostics.join("\n"),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BuildExecutor;
    use crate::executor::tests::{FakeRuntime, StaticReadiness, fast_settings};
    use crate::ledger::Teardown;
    use crate::pipeline::PipelineSettings;
    use crate::ports::PortAllocator;
    use crate::ports::tests::FakeProbe;
    use crate::scheduler::{JobQueue, JobTracker};
    use crate::service::fetcher::FetchError;
    use crate::service::{NodeProjectDetector, NotifierSet, SourceFetcher};
    use crate::shutdown::ShutdownCoordinator;
    use aether_core::domain::state::DeploymentState;
    use aether_proxy::{AppRegistry, ProxyConfig};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    /// Fetcher that blocks forever on a chosen branch
    struct StubFetcher;

    #[async_trait]
    impl SourceFetcher for StubFetcher {
        async fn fetch(&self, job: &DeploymentJob, dest: &Path) -> Result<(), FetchError> {
            if job.branch == "hang" {
                std::future::pending::<()>().await;
            }
            if job.branch == "panic" {
                panic!("fetcher exploded");
            }
            std::fs::create_dir_all(dest).unwrap();
            std::fs::write(
                dest.join("package.json"),
                r#"{"dependencies":{"next":"14"}}"#,
            )
            .unwrap();
            Ok(())
        }
    }

    struct Setup {
        _workspace: tempfile::TempDir,
        runtime: Arc<FakeRuntime>,
        queue: JobQueue,
        tracker: Arc<JobTracker>,
        ports: Arc<PortAllocator>,
        coordinator: Arc<ShutdownCoordinator>,
        shutdown: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(max_parallel_jobs: usize) -> Setup {
        let workspace = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::default());
        let executor = Arc::new(BuildExecutor::new(
            runtime.clone(),
            Arc::new(StaticReadiness(true)),
            fast_settings(),
        ));
        let ports = Arc::new(PortAllocator::new(5000..=5010, Arc::new(FakeProbe::default())));
        let registry = Arc::new(AppRegistry::new(ProxyConfig::default()));
        let coordinator = Arc::new(ShutdownCoordinator::new(Teardown::new(
            ports.clone(),
            executor.clone(),
            registry.clone(),
        )));
        let tracker = Arc::new(JobTracker::new());
        let notifier: Arc<dyn OutcomeNotifier> = Arc::new(NotifierSet::new().with(tracker.clone()));

        let pipeline = Arc::new(DeploymentPipeline::new(
            Arc::new(StubFetcher),
            Arc::new(NodeProjectDetector::new()),
            ports.clone(),
            executor,
            registry,
            coordinator.clone(),
            notifier.clone(),
            PipelineSettings {
                workspace_base: workspace.path().to_path_buf(),
                build_timeout: Duration::from_secs(60),
            },
        ));

        let (queue, receiver) = JobQueue::new(8, tracker.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Worker::new(receiver, pipeline, notifier, max_parallel_jobs);
        let handle = tokio::spawn(worker.run(shutdown_rx));

        Setup {
            _workspace: workspace,
            runtime,
            queue,
            tracker,
            ports,
            coordinator,
            shutdown,
            handle,
        }
    }

    async fn wait_for_state(tracker: &JobTracker, id: Uuid, state: DeploymentState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if tracker.get(id).map(|s| s.state) == Some(state) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("job {} never reached {}", id, state));
    }

    #[tokio::test]
    async fn test_runs_queued_job_to_completion() {
        let setup = start(1);
        let id = setup
            .queue
            .enqueue(DeploymentJob::new("t", "o/r", "main", 1))
            .unwrap();

        wait_for_state(&setup.tracker, id, DeploymentState::Deployed).await;
        let status = setup.tracker.get(id).unwrap();
        assert!(status.outcome.unwrap().success);

        setup.shutdown.send(true).unwrap();
        setup.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_run_is_unwound_and_reported() {
        let setup = start(1);
        let id = setup
            .queue
            .enqueue(DeploymentJob::new("t", "o/r", "panic", 1))
            .unwrap();

        wait_for_state(&setup.tracker, id, DeploymentState::Failed).await;
        let outcome = setup.tracker.get(id).unwrap().outcome.unwrap();
        assert_eq!(outcome.error_kind, Some(DeploymentErrorKind::Internal));
        assert_eq!(setup.coordinator.open_runs(), 0);

        setup.shutdown.send(true).unwrap();
        setup.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_aborts_in_flight_runs() {
        let setup = start(2);
        let id = setup
            .queue
            .enqueue(DeploymentJob::new("t", "o/r", "hang", 1))
            .unwrap();

        wait_for_state(&setup.tracker, id, DeploymentState::Cloning).await;
        setup.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), setup.handle)
            .await
            .unwrap()
            .unwrap();

        // The aborted run's ledger is still open for the coordinator to unwind
        assert_eq!(setup.coordinator.open_runs(), 1);
        assert_eq!(setup.coordinator.shutdown().await, (1, 0));
        assert!(setup.ports.in_use().is_empty());
    }

    #[tokio::test]
    async fn test_panic_after_port_allocation_releases_everything_once() {
        let setup = start(1);
        setup.runtime.panic_on_run.store(true, Ordering::SeqCst);
        let id = setup
            .queue
            .enqueue(DeploymentJob::new("t", "o/r", "main", 1))
            .unwrap();

        wait_for_state(&setup.tracker, id, DeploymentState::Failed).await;
        let outcome = setup.tracker.get(id).unwrap().outcome.unwrap();
        assert_eq!(outcome.error_kind, Some(DeploymentErrorKind::Internal));
        assert_eq!(setup.coordinator.open_runs(), 0);
        assert!(setup.ports.in_use().is_empty());
        assert!(setup.runtime.images.lock().unwrap().is_empty());
        assert!(setup.runtime.containers.lock().unwrap().is_empty());
        let removals = setup
            .runtime
            .calls()
            .iter()
            .filter(|call| call.starts_with("rmi "))
            .count();
        assert_eq!(removals, 1);

        // The port went back once: whoever claims it next keeps it
        let port = setup.ports.allocate().await.unwrap();
        assert_eq!(port, 5000);
        assert!(setup.coordinator.abort_run(id).await.is_empty());
        assert_eq!(setup.coordinator.shutdown().await, (0, 0));
        assert_eq!(setup.ports.in_use(), vec![port]);

        setup.shutdown.send(true).unwrap();
        setup.handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_finishes_interrupted_cleanup() {
        let setup = start(1);
        setup.runtime.exit_on_start.store(true, Ordering::SeqCst);
        *setup.runtime.stop_delay.lock().unwrap() = Duration::from_millis(500);
        setup
            .queue
            .enqueue(DeploymentJob::new("t", "o/r", "main", 1))
            .unwrap();

        // Wait until the failed run is busy stopping its container
        tokio::time::timeout(Duration::from_secs(5), async {
            while !setup.runtime.calls().iter().any(|call| call.starts_with("stop ")) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        setup.shutdown.send(true).unwrap();
        setup.handle.await.unwrap();
        assert_eq!(setup.coordinator.open_runs(), 1);

        assert_eq!(setup.coordinator.shutdown().await, (1, 0));
        assert!(setup.ports.in_use().is_empty());
        assert!(setup.runtime.images.lock().unwrap().is_empty());
        assert!(setup.runtime.containers.lock().unwrap().is_empty());
        assert_eq!(setup.coordinator.open_runs(), 0);
    }
}
