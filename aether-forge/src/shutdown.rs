//! Shutdown coordinator
//!
//! Owns the two kinds of live resources the forge holds:
//! - open run ledgers, one per pipeline run still in progress
//! - tracked deployments, one per app currently serving
//!
//! A run's ledger is handed over to a tracked deployment atomically when the
//! run succeeds, and a deployment that stops being tracked is handed back to
//! a ledger until its release completes, so at any moment every resource is
//! owned by one of the two. On process exit both are torn down.

use aether_core::dto::job::DeploymentSummary;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{Compensation, RunLedger, Teardown};

/// An app that finished deploying and is serving traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedDeployment {
    pub app_id: String,
    pub job_id: Uuid,
    pub port: u16,
    pub container_id: String,
    pub image_name: String,
    pub proxy_url: String,
    pub clone_dir: Option<PathBuf>,
    pub deployed_at: DateTime<Utc>,
}

impl TrackedDeployment {
    /// Compensations releasing everything the deployment holds, in
    /// acquisition order
    pub fn compensations(&self) -> Vec<Compensation> {
        let mut steps = Vec::with_capacity(5);
        if let Some(dir) = &self.clone_dir {
            steps.push(Compensation::RemoveDir(dir.clone()));
        }
        steps.push(Compensation::ReleasePort(self.port));
        steps.push(Compensation::RemoveImage(self.image_name.clone()));
        steps.push(Compensation::StopContainer(self.container_id.clone()));
        steps.push(Compensation::Unregister {
            app_id: self.app_id.clone(),
            port: self.port,
        });
        steps
    }

    pub fn summary(&self) -> DeploymentSummary {
        DeploymentSummary {
            app_id: self.app_id.clone(),
            port: self.port,
            container_id: self.container_id.clone(),
            image_name: self.image_name.clone(),
            proxy_url: self.proxy_url.clone(),
            deployed_at: self.deployed_at,
        }
    }
}

/// Open ledgers are keyed by job id. Releases of deployments that left
/// tracking get a ledger of their own under a fresh key.
#[derive(Default)]
struct Live {
    runs: HashMap<Uuid, Arc<RunLedger>>,
    deployments: HashMap<String, TrackedDeployment>,
}

impl Live {
    /// Opens a ledger owing everything `deployment` holds
    fn open_release(&mut self, deployment: &TrackedDeployment) -> Uuid {
        let key = Uuid::new_v4();
        self.runs.insert(
            key,
            Arc::new(RunLedger::with_steps(deployment.compensations())),
        );
        key
    }
}

pub struct ShutdownCoordinator {
    teardown: Teardown,
    live: Mutex<Live>,
}

impl ShutdownCoordinator {
    pub fn new(teardown: Teardown) -> Self {
        Self {
            teardown,
            live: Mutex::new(Live::default()),
        }
    }

    /// Opens the ledger for a run. Must happen before the run acquires
    /// anything.
    pub fn begin_run(&self, job_id: Uuid) -> Arc<RunLedger> {
        let ledger = Arc::new(RunLedger::new());
        self.lock().runs.insert(job_id, ledger.clone());
        ledger
    }

    /// Undoes a failed run's ledger, then closes it. The ledger stays open
    /// until its last step has run, so an unwind cut short by shutdown is
    /// finished by [`shutdown`](Self::shutdown).
    pub async fn abort_run(&self, job_id: Uuid) -> Vec<String> {
        let ledger = self.lock().runs.get(&job_id).cloned();
        let Some(ledger) = ledger else {
            return Vec::new();
        };

        let diagnostics = self.teardown.drain(&ledger).await;
        self.lock().runs.remove(&job_id);
        diagnostics
    }

    /// Closes a successful run's ledger and starts tracking its deployment.
    ///
    /// A deployment already tracked for the same app is retired: its
    /// resources are released, while its route (now pointing at the new
    /// port) is left alone.
    pub async fn commit_run(&self, job_id: Uuid, deployment: TrackedDeployment) {
        let retiring = {
            let mut live = self.lock();
            if let Some(ledger) = live.runs.remove(&job_id) {
                ledger.take();
            }
            live.deployments
                .insert(deployment.app_id.clone(), deployment)
                .map(|previous| (live.open_release(&previous), previous))
        };

        if let Some((key, previous)) = retiring {
            info!(
                "Retiring previous deployment of {} on port {}",
                previous.app_id, previous.port
            );
            self.report(self.abort_run(key).await);
        }
    }

    /// Tears down the tracked deployment of `app_id`, if any
    pub async fn teardown_app(&self, app_id: &str) -> Option<TrackedDeployment> {
        let (key, deployment) = {
            let mut live = self.lock();
            let deployment = live.deployments.remove(app_id)?;
            (live.open_release(&deployment), deployment)
        };

        info!("Tearing down {} on port {}", deployment.app_id, deployment.port);
        self.report(self.abort_run(key).await);
        Some(deployment)
    }

    /// Tracked deployments, sorted by app identifier
    pub fn deployments(&self) -> Vec<DeploymentSummary> {
        let mut list: Vec<DeploymentSummary> = self
            .lock()
            .deployments
            .values()
            .map(TrackedDeployment::summary)
            .collect();
        list.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        list
    }

    pub fn deployment(&self, app_id: &str) -> Option<TrackedDeployment> {
        self.lock().deployments.get(app_id).cloned()
    }

    pub fn open_runs(&self) -> usize {
        self.lock().runs.len()
    }

    /// Releases everything still held: open ledgers first, then every
    /// tracked deployment. Returns how many of each were torn down.
    pub async fn shutdown(&self) -> (usize, usize) {
        let (runs, deployments) = {
            let mut live = self.lock();
            let runs: Vec<Uuid> = live.runs.keys().copied().collect();
            let tracked: Vec<TrackedDeployment> =
                live.deployments.drain().map(|(_, d)| d).collect();
            let deployments: Vec<Uuid> = tracked
                .iter()
                .map(|deployment| live.open_release(deployment))
                .collect();
            (runs, deployments)
        };

        info!(
            "Shutting down: {} open ledger(s), {} deployment(s)",
            runs.len(),
            deployments.len()
        );

        for key in runs.iter().chain(&deployments) {
            self.report(self.abort_run(*key).await);
        }

        (runs.len(), deployments.len())
    }

    fn report(&self, diagnostics: Vec<String>) {
        for diagnostic in diagnostics {
            warn!("{}", diagnostic);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Live> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
