//! Forge configuration
//!
//! Defines all configurable parameters for the deployment worker including
//! the proxy's public address, the host port range handed out to apps,
//! build and readiness timeouts, and scheduler limits.

use aether_proxy::ProxyConfig;
use anyhow::Context;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::tracker::DEFAULT_JOB_RETENTION;

/// Forge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Public proxy settings (listen port, base domain, scheme)
    pub proxy: ProxyConfig,

    /// First host port handed out to deployed apps
    pub port_range_start: u16,

    /// Last host port handed out to deployed apps (inclusive)
    pub port_range_end: u16,

    /// Upper bound on a single image build
    pub build_timeout: Duration,

    /// Pause after starting a container before readiness checks begin
    pub settle_delay: Duration,

    /// How long a started container may take to answer on its port
    pub readiness_timeout: Duration,

    /// Container CLI binary (`docker` or `podman`)
    pub container_runtime: String,

    /// Directory holding per-job source checkouts
    pub workspace_base: PathBuf,

    /// Host serving the git repositories
    pub git_host: String,

    /// Max pipelines running at once
    pub max_parallel_jobs: usize,

    /// Max jobs waiting in the intake queue
    pub queue_capacity: usize,

    /// Finished jobs kept queryable before the oldest are forgotten
    pub job_retention: usize,

    /// Listen address of the job intake API
    pub admin_addr: String,

    /// Base URL receiving status and outcome callbacks
    pub callback_url: Option<String>,
}

impl Config {
    /// Creates a new configuration with defaults around the given proxy settings
    pub fn new(proxy: ProxyConfig) -> Self {
        Self {
            proxy,
            port_range_start: 5000,
            port_range_end: 5100,
            build_timeout: Duration::from_secs(600), // 10 minutes
            settle_delay: Duration::from_secs(2),
            readiness_timeout: Duration::from_secs(60),
            container_runtime: "docker".to_string(),
            workspace_base: PathBuf::from("./repos"),
            git_host: "github.com".to_string(),
            max_parallel_jobs: 1,
            queue_capacity: 64,
            job_retention: DEFAULT_JOB_RETENTION,
            admin_addr: "127.0.0.1:8090".to_string(),
            callback_url: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional:
    /// - PROXY_PORT (default: 8080)
    /// - PROXY_BIND_HOST (default: 0.0.0.0)
    /// - BASE_DOMAIN (default: localhost)
    /// - USE_HTTPS (default: false)
    /// - PORT_RANGE_START / PORT_RANGE_END (default: 5000 / 5100)
    /// - BUILD_TIMEOUT (seconds, default: 600)
    /// - SETTLE_DELAY (seconds, default: 2)
    /// - READINESS_TIMEOUT (seconds, default: 60)
    /// - CONTAINER_RUNTIME (default: docker)
    /// - WORKSPACE_DIR (default: ./repos)
    /// - GIT_HOST (default: github.com)
    /// - MAX_PARALLEL_JOBS (default: 1)
    /// - QUEUE_CAPACITY (default: 64)
    /// - JOB_RETENTION (default: 1000)
    /// - ADMIN_ADDR (default: 127.0.0.1:8090)
    /// - CALLBACK_URL (unset disables HTTP callbacks)
    pub fn from_env() -> anyhow::Result<Self> {
        let proxy_port = env_or("PROXY_PORT", 8080u16)?;
        let base_domain = std::env::var("BASE_DOMAIN").unwrap_or_else(|_| "localhost".to_string());
        let https = std::env::var("USE_HTTPS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let mut proxy = ProxyConfig::new(proxy_port, &base_domain, https);
        if let Ok(bind_host) = std::env::var("PROXY_BIND_HOST") {
            proxy.bind_host = bind_host;
        }

        let defaults = Self::new(proxy.clone());

        Ok(Self {
            proxy,
            port_range_start: env_or("PORT_RANGE_START", defaults.port_range_start)?,
            port_range_end: env_or("PORT_RANGE_END", defaults.port_range_end)?,
            build_timeout: env_secs("BUILD_TIMEOUT", defaults.build_timeout)?,
            settle_delay: env_secs("SETTLE_DELAY", defaults.settle_delay)?,
            readiness_timeout: env_secs("READINESS_TIMEOUT", defaults.readiness_timeout)?,
            container_runtime: std::env::var("CONTAINER_RUNTIME")
                .unwrap_or(defaults.container_runtime),
            workspace_base: std::env::var("WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_base),
            git_host: std::env::var("GIT_HOST").unwrap_or(defaults.git_host),
            max_parallel_jobs: env_or("MAX_PARALLEL_JOBS", defaults.max_parallel_jobs)?,
            queue_capacity: env_or("QUEUE_CAPACITY", defaults.queue_capacity)?,
            job_retention: env_or("JOB_RETENTION", defaults.job_retention)?,
            admin_addr: std::env::var("ADMIN_ADDR").unwrap_or(defaults.admin_addr),
            callback_url: std::env::var("CALLBACK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port_range_start == 0 {
            anyhow::bail!("port_range_start must be greater than 0");
        }

        if self.port_range_start > self.port_range_end {
            anyhow::bail!(
                "port range {}-{} is empty",
                self.port_range_start,
                self.port_range_end
            );
        }

        if (self.port_range_start..=self.port_range_end).contains(&self.proxy.port) {
            anyhow::bail!(
                "proxy port {} overlaps the app port range {}-{}",
                self.proxy.port,
                self.port_range_start,
                self.port_range_end
            );
        }

        if self.build_timeout.as_secs() == 0 {
            anyhow::bail!("build_timeout must be greater than 0");
        }

        if self.container_runtime.trim().is_empty() {
            anyhow::bail!("container_runtime cannot be empty");
        }

        if self.git_host.trim().is_empty() {
            anyhow::bail!("git_host cannot be empty");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.job_retention == 0 {
            anyhow::bail!("job_retention must be greater than 0");
        }

        if let Some(url) = &self.callback_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("callback_url must start with http:// or https://");
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(ProxyConfig::default())
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> anyhow::Result<Duration> {
    env_or(key, default.as_secs()).map(Duration::from_secs)
}
