//! Compensation ledger
//!
//! Every resource a pipeline run acquires is recorded as the compensating
//! action that releases it. A run that fails, panics or is interrupted by
//! shutdown is undone by replaying its ledger in reverse order.
//!
//! A step leaves the ledger only after it has been carried out, so a ledger
//! whose unwinding is cancelled halfway still lists everything left to undo.

use aether_proxy::AppRegistry;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::executor::BuildExecutor;
use crate::ports::PortAllocator;

/// Action undoing one acquired resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    RemoveDir(PathBuf),
    ReleasePort(u16),
    RemoveImage(String),
    StopContainer(String),
    /// Drops the route only while it still points at `port`
    Unregister {
        app_id: String,
        port: u16,
    },
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::RemoveDir(path) => write!(f, "remove directory {}", path.display()),
            Compensation::ReleasePort(port) => write!(f, "release port {}", port),
            Compensation::RemoveImage(image) => write!(f, "remove image {}", image),
            Compensation::StopContainer(container) => write!(f, "stop container {}", container),
            Compensation::Unregister { app_id, port } => {
                write!(f, "unregister {} (port {})", app_id, port)
            }
        }
    }
}

/// Ordered record of the compensations owed by one run
#[derive(Debug, Default)]
pub struct RunLedger {
    steps: Mutex<Vec<Compensation>>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger already owing `steps`, given in acquisition order
    pub fn with_steps(steps: Vec<Compensation>) -> Self {
        Self {
            steps: Mutex::new(steps),
        }
    }

    pub fn push(&self, step: Compensation) {
        self.lock().push(step);
    }

    /// Most recently acquired step still owed
    pub fn last(&self) -> Option<Compensation> {
        self.lock().last().cloned()
    }

    /// Drops `step` after it was carried out, unless another unwinder got
    /// there first
    fn settle(&self, step: &Compensation) {
        let mut steps = self.lock();
        if steps.last() == Some(step) {
            steps.pop();
        }
    }

    /// Empties the ledger, returning steps in acquisition order
    pub fn take(&self) -> Vec<Compensation> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Compensation>> {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Executes compensations against the shared resources
#[derive(Clone)]
pub struct Teardown {
    ports: Arc<PortAllocator>,
    executor: Arc<BuildExecutor>,
    registry: Arc<AppRegistry>,
}

impl Teardown {
    pub fn new(
        ports: Arc<PortAllocator>,
        executor: Arc<BuildExecutor>,
        registry: Arc<AppRegistry>,
    ) -> Self {
        Self {
            ports,
            executor,
            registry,
        }
    }

    /// Runs `steps` last-acquired-first. Every step is attempted; the
    /// failures are returned as diagnostics.
    pub async fn unwind(&self, steps: Vec<Compensation>) -> Vec<String> {
        self.drain(&RunLedger::with_steps(steps)).await
    }

    /// Undoes the ledger's steps last-acquired-first, removing each one only
    /// once it has run. Cancelling the future leaves the current step and
    /// everything older in the ledger.
    pub async fn drain(&self, ledger: &RunLedger) -> Vec<String> {
        let mut diagnostics = Vec::new();

        while let Some(step) = ledger.last() {
            if let Err(e) = self.undo(&step).await {
                warn!("Cleanup step '{}' failed: {}", step, e);
                diagnostics.push(format!("Failed to {}: {}", step, e));
            } else {
                info!("Cleanup: {}", step);
            }
            ledger.settle(&step);
        }

        diagnostics
    }

    async fn undo(&self, step: &Compensation) -> Result<(), String> {
        match step {
            Compensation::RemoveDir(path) => match tokio::fs::remove_dir_all(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.to_string()),
            },
            Compensation::ReleasePort(port) => {
                self.ports.release(*port);
                Ok(())
            }
            Compensation::RemoveImage(image) => {
                if self.executor.remove_image(image).await {
                    Ok(())
                } else {
                    Err("image removal failed".to_string())
                }
            }
            Compensation::StopContainer(container) => {
                if self.executor.stop(container).await {
                    Ok(())
                } else {
                    Err("container stop failed".to_string())
                }
            }
            Compensation::Unregister { app_id, port } => {
                self.registry.unregister_if(app_id, *port);
                Ok(())
            }
        }
    }
}
