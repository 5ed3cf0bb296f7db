//! Aether Forge
//!
//! Preview-deployment worker: turns a repository branch into a running
//! container reachable at its own subdomain.
//!
//! Architecture:
//! - Configuration: Load settings from environment (and `.env`) or defaults
//! - Services: source fetch, project detection, readiness, notifications
//! - Pipeline: clone → detect → allocate → build → deploy, with compensation
//! - Scheduler: bounded job queue and a worker with limited parallelism
//! - Proxy: subdomain-routing reverse proxy over the app registry
//! - API: job intake and deployment management
//!
//! On SIGINT/SIGTERM the listeners stop, in-flight runs are aborted, and
//! every container, image, port and route the forge holds is released.

mod api;
mod config;
mod executor;
mod ledger;
mod pipeline;
mod ports;
mod recipe;
mod runtime;
mod scheduler;
mod service;
mod shutdown;

use aether_proxy::{AppRegistry, ProxyState};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::AdminState;
use crate::config::Config;
use crate::executor::{BuildExecutor, ExecutorSettings};
use crate::ledger::Teardown;
use crate::pipeline::{DeploymentPipeline, PipelineSettings};
use crate::ports::{PortAllocator, TcpPortProbe};
use crate::runtime::CliRuntime;
use crate::scheduler::{JobQueue, JobTracker, Worker};
use crate::service::{
    GitFetcher, HttpNotifier, HttpReadinessProbe, LogNotifier, NodeProjectDetector, NotifierSet,
    OutcomeNotifier,
};
use crate::shutdown::ShutdownCoordinator;

/// How long listeners get to drain before being abandoned
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "aether_forge=info,aether_proxy=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Aether Forge");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: domain={}, ports={}-{}, runtime={}",
        config.proxy.base_domain,
        config.port_range_start,
        config.port_range_end,
        config.container_runtime
    );

    let runtime = Arc::new(CliRuntime::new(&config.container_runtime));
    runtime
        .check_available()
        .await
        .context("Container runtime unavailable")?;

    tokio::fs::create_dir_all(&config.workspace_base)
        .await
        .with_context(|| {
            format!(
                "Failed to create workspace {}",
                config.workspace_base.display()
            )
        })?;

    // Initialize shared state
    let registry = Arc::new(AppRegistry::new(config.proxy.clone()));
    let ports = Arc::new(PortAllocator::new(
        config.port_range_start..=config.port_range_end,
        Arc::new(TcpPortProbe),
    ));
    let readiness = Arc::new(HttpReadinessProbe::new().context("Failed to build HTTP client")?);
    let executor = Arc::new(BuildExecutor::new(
        runtime,
        readiness,
        ExecutorSettings {
            settle_delay: config.settle_delay,
            readiness_timeout: config.readiness_timeout,
            ..ExecutorSettings::default()
        },
    ));
    let coordinator = Arc::new(ShutdownCoordinator::new(Teardown::new(
        ports.clone(),
        executor.clone(),
        registry.clone(),
    )));

    // Initialize services
    let tracker = Arc::new(JobTracker::with_retention(config.job_retention));
    let mut notifiers = NotifierSet::new()
        .with(tracker.clone())
        .with(Arc::new(LogNotifier));
    if let Some(url) = &config.callback_url {
        info!("Delivering job callbacks to {}", url);
        notifiers = notifiers.with(Arc::new(
            HttpNotifier::new(url.as_str()).context("Failed to build HTTP client")?,
        ));
    }
    let notifier: Arc<dyn OutcomeNotifier> = Arc::new(notifiers);

    let pipeline = Arc::new(DeploymentPipeline::new(
        Arc::new(GitFetcher::new(config.git_host.clone())),
        Arc::new(NodeProjectDetector::new()),
        ports,
        executor,
        registry.clone(),
        coordinator.clone(),
        notifier.clone(),
        PipelineSettings {
            workspace_base: config.workspace_base.clone(),
            build_timeout: config.build_timeout,
        },
    ));

    info!("Services initialized");

    let (queue, receiver) = JobQueue::new(config.queue_capacity, tracker);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start listeners
    let proxy_listener = TcpListener::bind(config.proxy.bind_addr())
        .await
        .with_context(|| format!("Failed to bind proxy on {}", config.proxy.bind_addr()))?;
    let admin_listener = TcpListener::bind(&config.admin_addr)
        .await
        .with_context(|| format!("Failed to bind intake API on {}", config.admin_addr))?;

    let proxy_state = ProxyState::new(registry).context("Failed to build proxy client")?;
    let proxy_handle = tokio::spawn(aether_proxy::serve(
        proxy_listener,
        proxy_state,
        stopped(shutdown_rx.clone()),
    ));

    info!("Intake API listening on {}", admin_listener.local_addr()?);
    let admin_router = api::create_router(AdminState {
        queue,
        coordinator: coordinator.clone(),
    });
    let admin_shutdown = stopped(shutdown_rx.clone());
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_router)
            .with_graceful_shutdown(admin_shutdown)
            .await
    });

    // Start the worker
    let worker = Worker::new(receiver, pipeline, notifier, config.max_parallel_jobs);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    info!("Forge initialized successfully");

    shutdown_signal().await;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Err(e) = worker_handle.await {
        error!("Worker task failed: {}", e);
    }

    for (name, handle) in [("proxy", proxy_handle), ("intake API", admin_handle)] {
        match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
            Ok(Ok(Ok(()))) => info!("{} stopped", name),
            Ok(Ok(Err(e))) => error!("{} server error: {}", name, e),
            Ok(Err(e)) => error!("{} task failed: {}", name, e),
            Err(_) => warn!("{} did not drain within {:?}", name, DRAIN_TIMEOUT),
        }
    }

    let (runs, deployments) = coordinator.shutdown().await;
    info!(
        "Released {} in-flight run(s) and {} deployment(s), goodbye",
        runs, deployments
    );

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            warn!("Failed to load config from environment ({:#}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Resolves once the shutdown flag is raised
fn stopped(mut shutdown: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
