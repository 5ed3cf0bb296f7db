//! Build & run executor
//!
//! Turns a detected source tree into a running container on a given host
//! port:
//! - Writes the build descriptor into the checkout
//! - Builds the image under a timeout
//! - Starts the container with the port published
//! - Waits for the container to stay up and answer on its port
//!
//! The executor never cleans up after itself on failure. Every artifact
//! name is decided before it is created so the caller can record the
//! matching compensation first and undo whatever got created.

use aether_core::domain::outcome::DeploymentErrorKind;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::recipe::{self, APP_PORT};
use crate::runtime::{ContainerRuntime, RuntimeError};
use crate::service::ReadinessProbe;
use crate::service::detector::ProjectKind;

/// Lines of container output captured when a container dies on start
pub const CONTAINER_LOG_TAIL: usize = 100;

/// Executor timing knobs
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Pause after `run` before the first readiness check
    pub settle_delay: Duration,
    /// Total time a started container gets to answer on its port
    pub readiness_timeout: Duration,
    /// Pause between readiness checks
    pub poll_interval: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            readiness_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Names of the image and container of one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    pub image: String,
    pub container: String,
}

impl ArtifactNames {
    /// Fresh names built from the current time and a random suffix
    pub fn generate() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        let unique = format!("{}-{}", Utc::now().timestamp_millis(), &random[..9]);
        Self {
            image: format!("aether-app-{}", unique),
            container: format!("aether-container-{}", unique),
        }
    }
}

/// Everything needed to build and start one app
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source_dir: PathBuf,
    pub app_id: String,
    pub kind: ProjectKind,
    pub port: u16,
    pub names: ArtifactNames,
    pub build_timeout: Duration,
}

/// A container that is up and answering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApp {
    pub container_id: String,
    pub image_name: String,
    pub port: u16,
    pub build_logs: String,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to write build descriptor: {0}")]
    Descriptor(#[source] std::io::Error),

    #[error("Build failed: {reason}")]
    BuildFailed { reason: String, logs: String },

    #[error("Build timed out after {after:?}")]
    BuildTimedOut { after: Duration, logs: String },

    #[error("Failed to start container: {reason}")]
    StartFailed { reason: String, logs: String },

    #[error("Container exited unexpectedly")]
    ContainerExited { logs: String },

    #[error("Container did not respond on port {port} within {after:?}")]
    NotReady {
        port: u16,
        after: Duration,
        logs: String,
    },
}

impl ExecutorError {
    /// Build output, plus container output when the container got that far
    pub fn logs(&self) -> &str {
        match self {
            ExecutorError::Descriptor(_) => "",
            ExecutorError::BuildFailed { logs, .. }
            | ExecutorError::BuildTimedOut { logs, .. }
            | ExecutorError::StartFailed { logs, .. }
            | ExecutorError::ContainerExited { logs }
            | ExecutorError::NotReady { logs, .. } => logs,
        }
    }

    pub fn kind(&self) -> DeploymentErrorKind {
        match self {
            ExecutorError::Descriptor(_) => DeploymentErrorKind::Internal,
            ExecutorError::BuildFailed { .. } | ExecutorError::BuildTimedOut { .. } => {
                DeploymentErrorKind::BuildFailure
            }
            ExecutorError::StartFailed { .. }
            | ExecutorError::ContainerExited { .. }
            | ExecutorError::NotReady { .. } => DeploymentErrorKind::RuntimeFailure,
        }
    }
}

/// Builds images and runs containers through a [`ContainerRuntime`]
pub struct BuildExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    readiness: Arc<dyn ReadinessProbe>,
    settings: ExecutorSettings,
}

impl BuildExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        readiness: Arc<dyn ReadinessProbe>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            runtime,
            readiness,
            settings,
        }
    }

    /// Builds the image, starts the container and waits until it answers
    pub async fn build_and_run(&self, request: &BuildRequest) -> Result<RunningApp, ExecutorError> {
        let dockerfile = recipe::write_dockerfile(&request.source_dir, &request.kind)
            .await
            .map_err(ExecutorError::Descriptor)?;

        info!(
            app_id = %request.app_id,
            "Building {} image {}",
            request.kind,
            request.names.image
        );

        let build_logs = self
            .runtime
            .build_image(
                &request.source_dir,
                &dockerfile,
                &request.names.image,
                request.build_timeout,
            )
            .await
            .map_err(|e| match e {
                RuntimeError::TimedOut { after, output, .. } => ExecutorError::BuildTimedOut {
                    after,
                    logs: output,
                },
                other => ExecutorError::BuildFailed {
                    logs: other.output(),
                    reason: other.to_string(),
                },
            })?;

        info!(app_id = %request.app_id, "Image {} built", request.names.image);

        let container_id = self
            .runtime
            .run_container(
                &request.names.image,
                &request.names.container,
                request.port,
                APP_PORT,
            )
            .await
            .map_err(|e| ExecutorError::StartFailed {
                reason: e.to_string(),
                logs: build_logs.clone(),
            })?;

        self.wait_until_ready(&container_id, request.port, &build_logs)
            .await?;

        info!(
            app_id = %request.app_id,
            "Container {} ready on port {}",
            container_id,
            request.port
        );

        Ok(RunningApp {
            container_id,
            image_name: request.names.image.clone(),
            port: request.port,
            build_logs,
        })
    }

    async fn wait_until_ready(
        &self,
        container_id: &str,
        port: u16,
        build_logs: &str,
    ) -> Result<(), ExecutorError> {
        tokio::time::sleep(self.settings.settle_delay).await;
        let deadline = Instant::now() + self.settings.readiness_timeout;

        loop {
            let running = match self.runtime.is_running(container_id).await {
                Ok(running) => running,
                Err(e) => {
                    warn!("Failed to inspect container {}: {}", container_id, e);
                    false
                }
            };

            if !running {
                let container_logs = self.get_logs(container_id).await;
                return Err(ExecutorError::ContainerExited {
                    logs: with_container_logs(build_logs, &container_logs),
                });
            }

            if self.readiness.is_ready(port).await {
                return Ok(());
            }

            if Instant::now() >= deadline {
                let container_logs = self.get_logs(container_id).await;
                return Err(ExecutorError::NotReady {
                    port,
                    after: self.settings.readiness_timeout,
                    logs: with_container_logs(build_logs, &container_logs),
                });
            }

            debug!("Container {} not answering yet", container_id);
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Stops and removes a container. Returns `false` instead of failing.
    pub async fn stop(&self, container: &str) -> bool {
        match self.runtime.stop_container(container).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to stop container {}: {}", container, e);
                false
            }
        }
    }

    /// Removes an image. Returns `false` instead of failing.
    pub async fn remove_image(&self, image: &str) -> bool {
        match self.runtime.remove_image(image).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to remove image {}: {}", image, e);
                false
            }
        }
    }

    /// Last lines of container output, or the reason they are unavailable
    pub async fn get_logs(&self, container: &str) -> String {
        match self.runtime.logs(container, CONTAINER_LOG_TAIL).await {
            Ok(logs) => logs,
            Err(e) => {
                let partial = e.output();
                if partial.is_empty() {
                    format!("Failed to get logs: {}", e)
                } else {
                    partial
                }
            }
        }
    }
}

fn with_container_logs(build_logs: &str, container_logs: &str) -> String {
    format!("{}\n\n=== Container Logs ===\n{}", build_logs, container_logs)
}
