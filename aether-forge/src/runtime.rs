//! Container runtime
//!
//! Thin async wrapper over a docker-compatible CLI:
//! - Checking the runtime binary is available
//! - Building images from a generated Dockerfile
//! - Running, inspecting and tailing containers
//! - Stopping containers and removing images

use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {code}: {}", .stderr.trim())]
    Failed {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {after:?}")]
    TimedOut {
        command: String,
        after: Duration,
        output: String,
    },
}

impl RuntimeError {
    /// Output the failing command produced before it gave up
    pub fn output(&self) -> String {
        match self {
            RuntimeError::Failed { stdout, stderr, .. } => join_output(stdout, stderr),
            RuntimeError::TimedOut { output, .. } => output.clone(),
            RuntimeError::Spawn { .. } => String::new(),
        }
    }
}

/// Operations the deployment pipeline needs from a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds `image` from `dockerfile` with `context` as build context and
    /// returns the combined build output
    async fn build_image(
        &self,
        context: &Path,
        dockerfile: &Path,
        image: &str,
        timeout: Duration,
    ) -> Result<String, RuntimeError>;

    /// Starts a detached container publishing `container_port` on `host_port`
    /// and returns the container id
    async fn run_container(
        &self,
        image: &str,
        name: &str,
        host_port: u16,
        container_port: u16,
    ) -> Result<String, RuntimeError>;

    async fn is_running(&self, container: &str) -> Result<bool, RuntimeError>;

    /// Last `tail` lines of the container's stdout and stderr
    async fn logs(&self, container: &str, tail: usize) -> Result<String, RuntimeError>;

    /// Stops and removes a container
    async fn stop_container(&self, container: &str) -> Result<(), RuntimeError>;

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError>;
}

/// Runtime driving the `docker` (or `podman`) command line
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks the runtime binary is installed and answering
    pub async fn check_available(&self) -> anyhow::Result<()> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| {
                format!(
                    "Failed to execute '{} --version'. Is it installed?",
                    self.binary
                )
            })?;

        if !output.status.success() {
            anyhow::bail!("{} is not working correctly", self.binary);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("Container runtime is available: {}", version.trim());

        Ok(())
    }

    async fn exec(&self, args: &[&str], timeout: Option<Duration>) -> Result<String, RuntimeError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!("Running {}", command);

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = CapturedOutput::spawn(child.stdout.take());
        let stderr = CapturedOutput::spawn(child.stderr.take());

        let status = match timeout {
            Some(after) => {
                let waited = tokio::time::timeout(after, child.wait()).await;
                match waited {
                    Ok(status) => status,
                    Err(_) => {
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill `{}`: {}", command, e);
                        }
                        let output = join_output(&stdout.abort(), &stderr.abort());
                        return Err(RuntimeError::TimedOut {
                            command,
                            after,
                            output,
                        });
                    }
                }
            }
            None => child.wait().await,
        }
        .map_err(|source| RuntimeError::Spawn {
            command: command.clone(),
            source,
        })?;

        let stdout = stdout.finish().await;
        let stderr = stderr.finish().await;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            debug!(
                "{} failed: exit_code={} stderr='{}'",
                command,
                code,
                stderr.trim()
            );
            return Err(RuntimeError::Failed {
                command,
                code,
                stdout,
                stderr,
            });
        }

        Ok(join_output(&stdout, &stderr))
    }
}

/// One output stream of a child, drained into memory as it is produced so
/// a killed command still leaves what it printed
struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
}

impl CapturedOutput {
    fn spawn<R>(stream: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();

        let reader = tokio::spawn(async move {
            let Some(mut stream) = stream else { return };
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        debug!("Stopped reading command output: {}", e);
                        break;
                    }
                }
            }
        });

        Self { buffer, reader }
    }

    /// Waits for the stream to close and returns everything read
    async fn finish(mut self) -> String {
        if let Err(e) = (&mut self.reader).await {
            debug!("Output reader ended abnormally: {}", e);
        }
        self.contents()
    }

    /// Stops reading and returns what was read so far
    fn abort(self) -> String {
        self.reader.abort();
        self.contents()
    }

    fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer).to_string()
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn build_image(
        &self,
        context: &Path,
        dockerfile: &Path,
        image: &str,
        timeout: Duration,
    ) -> Result<String, RuntimeError> {
        let context = context.to_string_lossy();
        let dockerfile = dockerfile.to_string_lossy();

        info!("Building image {} from {}", image, context);
        self.exec(
            &["build", "-f", &dockerfile, "-t", image, &context],
            Some(timeout),
        )
        .await
    }

    async fn run_container(
        &self,
        image: &str,
        name: &str,
        host_port: u16,
        container_port: u16,
    ) -> Result<String, RuntimeError> {
        let publish = format!("{}:{}", host_port, container_port);

        let output = self
            .exec(&["run", "-d", "--name", name, "-p", &publish, image], None)
            .await?;

        // `run -d` prints the id as its last stdout line; pull progress may precede it
        let container_id = output
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .unwrap_or(name)
            .to_string();

        info!(
            "Container {} started with ID {} on port {}",
            name, container_id, host_port
        );
        Ok(container_id)
    }

    async fn is_running(&self, container: &str) -> Result<bool, RuntimeError> {
        let output = self
            .exec(&["inspect", "-f", "{{.State.Running}}", container], None)
            .await?;
        Ok(output.trim() == "true")
    }

    async fn logs(&self, container: &str, tail: usize) -> Result<String, RuntimeError> {
        let tail = tail.to_string();
        self.exec(&["logs", "--tail", &tail, container], None).await
    }

    async fn stop_container(&self, container: &str) -> Result<(), RuntimeError> {
        // Stop errors are ignored; `rm -f` below decides the result
        if let Err(e) = self.exec(&["stop", container], None).await {
            debug!("Stop of {} failed: {}", container, e);
        }

        self.exec(&["rm", "-f", container], None).await?;
        info!("Container {} stopped and removed", container);
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.exec(&["rmi", image], None).await?;
        info!("Image {} removed", image);
        Ok(())
    }
}

fn join_output(stdout: &str, stderr: &str) -> String {
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (true, true) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_output() {
        assert_eq!(join_output("out\n", "err\n"), "out\nerr");
        assert_eq!(join_output("out", ""), "out");
        assert_eq!(join_output("  ", "err"), "err");
        assert_eq!(join_output("", ""), "");
    }

    #[test]
    fn test_failed_error_carries_output() {
        let err = RuntimeError::Failed {
            command: "docker build".to_string(),
            code: 1,
            stdout: "step 1/5".to_string(),
            stderr: "npm ERR! missing script: build\n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "`docker build` exited with code 1: npm ERR! missing script: build"
        );
        assert!(err.output().contains("step 1/5"));
    }

    /// Writes an executable shell script standing in for the runtime binary
    #[cfg(unix)]
    fn fake_binary(dir: &Path, script: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-docker");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_timeout_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(dir.path(), "echo 'Step 3/8 : RUN pnpm install'; sleep 5");
        let runtime = CliRuntime::new(binary.to_string_lossy());

        let started = std::time::Instant::now();
        let err = runtime
            .build_image(
                dir.path(),
                &dir.path().join("Dockerfile"),
                "img",
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(matches!(err, RuntimeError::TimedOut { .. }));
        assert!(err.to_string().ends_with("timed out after 500ms"));
        assert!(err.output().contains("Step 3/8 : RUN pnpm install"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_binary(dir.path(), "echo building; echo 'no space left' >&2; exit 3");
        let runtime = CliRuntime::new(binary.to_string_lossy());

        let err = runtime.remove_image("img").await.unwrap_err();
        match &err {
            RuntimeError::Failed { code, stdout, stderr, .. } => {
                assert_eq!(*code, 3);
                assert_eq!(stdout.trim(), "building");
                assert_eq!(stderr.trim(), "no space left");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runtime = CliRuntime::new("aether-no-such-runtime-binary");
        let err = runtime.is_running("x").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
        assert!(runtime.check_available().await.is_err());
    }
}
