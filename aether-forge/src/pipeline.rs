//! Deployment pipeline
//!
//! Drives one job through `cloning → detecting → allocating → building →
//! deploying → deployed`. Each resource the run acquires is recorded in the
//! run's ledger before (or, for the port, right after) it comes into being,
//! so a failure at any step releases exactly what was acquired.

use aether_core::domain::job::DeploymentJob;
use aether_core::domain::outcome::{
    DeployedApp, DeploymentErrorKind, FailedDeployment, JobOutcome,
};
use aether_core::domain::state::{DeploymentState, InvalidTransition, StateMachine};
use aether_proxy::AppRegistry;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::executor::{ArtifactNames, BuildExecutor, BuildRequest, ExecutorError};
use crate::ledger::{Compensation, RunLedger};
use crate::ports::{PortAllocator, PortError};
use crate::service::detector::Detection;
use crate::service::fetcher::{FetchError, clone_dir_for};
use crate::service::{OutcomeNotifier, ProjectDetector, SourceFetcher};
use crate::shutdown::{ShutdownCoordinator, TrackedDeployment};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Failed to clone repository: {0}")]
    Fetch(#[from] FetchError),

    #[error("Unsupported project type: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Ports(#[from] PortError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl PipelineError {
    pub fn kind(&self) -> DeploymentErrorKind {
        match self {
            PipelineError::Fetch(_) => DeploymentErrorKind::FetchFailure,
            PipelineError::Unsupported(_) => DeploymentErrorKind::UnsupportedProject,
            PipelineError::Ports(_) => DeploymentErrorKind::NoPortsAvailable,
            PipelineError::Executor(e) => e.kind(),
            PipelineError::InvalidJob(_) | PipelineError::Transition(_) => {
                DeploymentErrorKind::Internal
            }
        }
    }

    pub fn logs(&self) -> &str {
        match self {
            PipelineError::Executor(e) => e.logs(),
            _ => "",
        }
    }
}

/// Pipeline settings taken from the forge configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workspace_base: PathBuf,
    pub build_timeout: Duration,
}

/// Per-run scratch state kept outside the fallible body
struct RunState {
    machine: StateMachine,
    clone_dir: Option<PathBuf>,
}

pub struct DeploymentPipeline {
    fetcher: Arc<dyn SourceFetcher>,
    detector: Arc<dyn ProjectDetector>,
    ports: Arc<PortAllocator>,
    executor: Arc<BuildExecutor>,
    registry: Arc<AppRegistry>,
    coordinator: Arc<ShutdownCoordinator>,
    notifier: Arc<dyn OutcomeNotifier>,
    settings: PipelineSettings,
}

impl DeploymentPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        detector: Arc<dyn ProjectDetector>,
        ports: Arc<PortAllocator>,
        executor: Arc<BuildExecutor>,
        registry: Arc<AppRegistry>,
        coordinator: Arc<ShutdownCoordinator>,
        notifier: Arc<dyn OutcomeNotifier>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            fetcher,
            detector,
            ports,
            executor,
            registry,
            coordinator,
            notifier,
            settings,
        }
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    /// Runs one job to a terminal state. Never fails: every error becomes a
    /// failed outcome after the run's resources are released.
    pub async fn run(&self, job_id: Uuid, job: &DeploymentJob) -> JobOutcome {
        let app_id = job.app_id();
        info!(%job_id, %app_id, "Starting deployment of {} ({})", job.repo, job.branch);

        let ledger = self.coordinator.begin_run(job_id);
        let mut run = RunState {
            machine: StateMachine::new(),
            clone_dir: None,
        };

        let result = self.execute(job_id, job, &ledger, &mut run).await;
        let clone_dir = run
            .clone_dir
            .as_ref()
            .map(|dir| dir.to_string_lossy().to_string());

        match result {
            Ok(app) => {
                info!(%job_id, %app_id, "Deployed at {}", app.proxy_url);
                JobOutcome::deployed(job, clone_dir, app)
            }
            Err(e) => {
                error!(%job_id, %app_id, "Deployment failed: {}", e);
                if run.machine.advance(DeploymentState::Failed).is_ok() {
                    self.notifier
                        .state_changed(job_id, job, DeploymentState::Failed)
                        .await;
                }

                let diagnostics = self.coordinator.abort_run(job_id).await;
                let mut build_logs = e.logs().to_string();
                for diagnostic in diagnostics {
                    build_logs.push_str("\n[cleanup] ");
                    build_logs.push_str(&diagnostic);
                }

                JobOutcome::failed(
                    job,
                    clone_dir,
                    FailedDeployment {
                        kind: e.kind(),
                        error: e.to_string(),
                        build_logs,
                    },
                )
            }
        }
    }

    async fn execute(
        &self,
        job_id: Uuid,
        job: &DeploymentJob,
        ledger: &RunLedger,
        run: &mut RunState,
    ) -> Result<DeployedApp, PipelineError> {
        job.validate().map_err(PipelineError::InvalidJob)?;
        let app_id = job.app_id();

        // Fetch
        self.enter(job_id, job, run, DeploymentState::Cloning).await?;
        let clone_dir = clone_dir_for(&self.settings.workspace_base, job, job_id);
        ledger.push(Compensation::RemoveDir(clone_dir.clone()));
        run.clone_dir = Some(clone_dir.clone());
        self.fetcher.fetch(job, &clone_dir).await?;

        // Detect
        self.enter(job_id, job, run, DeploymentState::Detecting).await?;
        let kind = match self.detector.detect(&clone_dir).await {
            Detection::Supported(kind) => kind,
            Detection::Unsupported(reason) => return Err(PipelineError::Unsupported(reason)),
        };
        info!(%job_id, "Detected {}", kind);

        // Allocate
        self.enter(job_id, job, run, DeploymentState::Allocating).await?;
        let port = self.ports.allocate().await?;
        ledger.push(Compensation::ReleasePort(port));

        // Build and start
        self.enter(job_id, job, run, DeploymentState::Building).await?;
        let names = ArtifactNames::generate();
        ledger.push(Compensation::RemoveImage(names.image.clone()));
        ledger.push(Compensation::StopContainer(names.container.clone()));

        let running = self
            .executor
            .build_and_run(&BuildRequest {
                source_dir: clone_dir.clone(),
                app_id: app_id.clone(),
                kind,
                port,
                names,
                build_timeout: self.settings.build_timeout,
            })
            .await?;

        // Expose
        self.enter(job_id, job, run, DeploymentState::Deploying).await?;
        let proxy_url = self.registry.register(&app_id, port);
        ledger.push(Compensation::Unregister {
            app_id: app_id.clone(),
            port,
        });

        self.coordinator
            .commit_run(
                job_id,
                TrackedDeployment {
                    app_id: app_id.clone(),
                    job_id,
                    port,
                    container_id: running.container_id.clone(),
                    image_name: running.image_name.clone(),
                    proxy_url: proxy_url.clone(),
                    clone_dir: Some(clone_dir),
                    deployed_at: Utc::now(),
                },
            )
            .await;

        self.enter(job_id, job, run, DeploymentState::Deployed).await?;

        Ok(DeployedApp {
            app_id,
            proxy_url,
            container_id: running.container_id,
            image_name: running.image_name,
            port,
            build_logs: running.build_logs,
        })
    }

    async fn enter(
        &self,
        job_id: Uuid,
        job: &DeploymentJob,
        run: &mut RunState,
        state: DeploymentState,
    ) -> Result<(), PipelineError> {
        run.machine.advance(state)?;
        self.notifier.state_changed(job_id, job, state).await;
        Ok(())
    }
}
