//! Backend server process lifecycle
//!
//! Each session owns exactly one backend server process. The supervisor
//! spawns it on its allocated port, pipes its output into the session's log
//! file, polls the backend's status endpoint until it is ready, and tears it
//! down with SIGTERM escalating to SIGKILL.

use crate::client::BackendClient;
use crate::config::BackendConfig;
use crate::error::HubError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Timeout for a single readiness probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// State of a backend server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    /// Process spawned, waiting for its status endpoint to answer
    Starting,
    /// Process answered its status endpoint and accepts traffic
    Ready,
    /// Process is running but was last observed unreachable
    Unhealthy,
    /// Process has exited or been stopped
    Terminated,
}

/// One spawned backend server
#[derive(Debug)]
pub struct BackendProcess {
    /// Port the server was told to bind
    port: u16,
    /// File receiving the process's stdout/stderr
    log_path: PathBuf,
    /// OS process id at spawn time
    pid: Option<u32>,
    /// When the process was spawned
    spawned_at: Instant,
    /// The child handle; taken exactly once by the stop path
    child: Mutex<Option<Child>>,
    state: Mutex<BackendState>,
    /// Last time the status endpoint answered or a proxied call succeeded
    last_healthy: Mutex<Option<Instant>>,
}

impl BackendProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> BackendState {
        *self.state.lock()
    }

    pub fn uptime(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    /// Record a successful observation of the backend
    pub fn mark_healthy(&self) {
        let mut state = self.state.lock();
        if *state == BackendState::Unhealthy {
            *state = BackendState::Ready;
        }
        *self.last_healthy.lock() = Some(Instant::now());
    }

    /// Record that the backend could not be reached
    pub fn mark_unhealthy(&self) {
        let mut state = self.state.lock();
        if *state == BackendState::Ready {
            *state = BackendState::Unhealthy;
        }
    }

    pub fn last_healthy(&self) -> Option<Instant> {
        *self.last_healthy.lock()
    }
}

/// Spawns, readiness-checks and terminates backend server processes
pub struct ProcessSupervisor {
    backend: BackendConfig,
    client: Arc<BackendClient>,
}

impl ProcessSupervisor {
    pub fn new(backend: BackendConfig, client: Arc<BackendClient>) -> Self {
        Self { backend, client }
    }

    /// Spawn a backend server bound to `port`, capturing its output to
    /// `log_path`. The process is not ready until [`await_ready`] succeeds.
    ///
    /// [`await_ready`]: ProcessSupervisor::await_ready
    pub fn start(&self, port: u16, log_path: &Path) -> Result<BackendProcess, HubError> {
        let log_str = log_path.to_string_lossy();
        let args = self.backend.args_for(port, &log_str);

        info!(command = %self.backend.command, port, "Starting backend server");

        let mut cmd = Command::new(&self.backend.command);
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env("PORT", port.to_string());

        let mut child = cmd
            .spawn()
            .map_err(|e| HubError::LaunchError(format!("{}: {}", self.backend.command, e)))?;

        let pid = child.id();
        info!(port, pid, "Backend process spawned");

        if let Some(stdout) = child.stdout.take() {
            pump_output(stdout, log_path.to_path_buf(), port, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            pump_output(stderr, log_path.to_path_buf(), port, "stderr");
        }

        Ok(BackendProcess {
            port,
            log_path: log_path.to_path_buf(),
            pid,
            spawned_at: Instant::now(),
            child: Mutex::new(Some(child)),
            state: Mutex::new(BackendState::Starting),
            last_healthy: Mutex::new(None),
        })
    }

    /// Poll the backend's status endpoint until it answers 2xx or `timeout`
    /// elapses. On timeout or early process death the process is stopped
    /// before the error is returned, so no orphan survives a failed launch.
    pub async fn await_ready(
        &self,
        process: &BackendProcess,
        timeout: Duration,
    ) -> Result<(), HubError> {
        let start = Instant::now();
        let interval = self.backend.readiness_poll_interval();

        loop {
            if self
                .client
                .check_status(process.port, &self.backend.status_path, PROBE_TIMEOUT)
                .await
            {
                *process.state.lock() = BackendState::Ready;
                *process.last_healthy.lock() = Some(Instant::now());
                info!(
                    port = process.port,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Backend server ready"
                );
                return Ok(());
            }

            if !self.is_alive(process) {
                warn!(port = process.port, "Backend process exited during startup");
                self.stop(process).await;
                return Err(HubError::LaunchError(
                    "backend process exited during startup".to_string(),
                ));
            }

            if start.elapsed() >= timeout {
                warn!(
                    port = process.port,
                    timeout_secs = timeout.as_secs(),
                    "Backend startup timeout exceeded"
                );
                self.stop(process).await;
                return Err(HubError::ReadinessTimeout(timeout.as_secs()));
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// True OS-level liveness, not merely "we have not stopped it yet".
    /// A process observed dead transitions to `Terminated`.
    pub fn is_alive(&self, process: &BackendProcess) -> bool {
        let mut child = process.child.lock();
        match child.as_mut() {
            Some(c) => match c.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!(port = process.port, ?status, "Backend process has exited");
                    *process.state.lock() = BackendState::Terminated;
                    false
                }
                Err(e) => {
                    warn!(port = process.port, error = %e, "Failed to poll backend process");
                    false
                }
            },
            None => false,
        }
    }

    /// Stop the process: SIGTERM, wait for the configured grace period, then
    /// SIGKILL. Idempotent; stopping an already-stopped process is a no-op.
    pub async fn stop(&self, process: &BackendProcess) {
        // Claim the child under the lock; only one caller gets to stop it
        let child = process.child.lock().take();
        *process.state.lock() = BackendState::Terminated;

        let Some(mut child) = child else {
            debug!(port = process.port, "Backend process already stopped");
            return;
        };

        let grace = self.backend.shutdown_grace();

        if let Some(pid) = child.id() {
            info!(port = process.port, pid, "Sending SIGTERM to backend");

            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }

            #[cfg(not(unix))]
            {
                let _ = child.start_kill();
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(port = process.port, ?status, "Backend process exited");
            }
            Ok(Err(e)) => {
                warn!(port = process.port, error = %e, "Error waiting for backend to exit");
            }
            Err(_) => {
                warn!(
                    port = process.port,
                    grace_secs = grace.as_secs(),
                    "Grace period exceeded, sending SIGKILL"
                );
                let _ = child.kill().await;
            }
        }
    }
}

/// Copy one of the child's output streams into the session log file
fn pump_output<R>(mut stream: R, path: PathBuf, port: u16, name: &'static str)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await;

        match file {
            Ok(mut file) => {
                if let Err(e) = tokio::io::copy(&mut stream, &mut file).await {
                    debug!(port, stream = name, error = %e, "Backend log capture ended");
                }
            }
            Err(e) => {
                warn!(port, path = %path.display(), error = %e, "Failed to open backend log file");
            }
        }
    });
}
