//! Lifecycle management for the local worker process.
//!
//! [`ProcessSupervisor`] spawns the worker, treats it as healthy once it has
//! survived a short startup grace period, restarts it a bounded number of
//! times after a crash, and stops it through the worker's `/shutdown`
//! endpoint with a forced kill as the last resort.
//!
//! All status mutation goes through one function under one lock; the result
//! is published on a `watch` channel and as [`CoreEvent`]s.

mod error;
mod locate;
mod probe;
mod state;

pub use error::SupervisorError;
pub use locate::{candidate_paths, kill_by_image_name, locate_worker};
pub use probe::{PortProbe, TcpProbe};
pub use state::{StopOutcome, WorkerProcessState, WorkerStatus};

use crate::config::WorkerConfig;
use crate::events::{CoreEvent, EventBus};
use crate::worker::WorkerClient;
use chrono::Utc;
use futures_util::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default overall deadline for [`ProcessSupervisor::stop`].
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(4000);
/// Default port poll interval while waiting for the worker to exit.
pub const DEFAULT_STOP_POLL: Duration = Duration::from_millis(300);
/// Stop deadline used by [`ProcessSupervisor::restart`].
pub const RESTART_STOP_TIMEOUT: Duration = Duration::from_millis(2500);

const KILL_WAIT: Duration = Duration::from_secs(5);
const READY_POLL: Duration = Duration::from_millis(200);

/// Environment variable telling the worker where the config documents live.
pub const CONFIG_DIR_ENV: &str = "EVE_CONFIG_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartMode {
    Explicit,
    Auto,
}

enum Gate {
    Go,
    Busy,
    Throttled(Duration),
}

struct ChildHandle {
    generation: u64,
    kill: CancellationToken,
    exited: oneshot::Receiver<()>,
}

struct SupervisorState {
    status: WorkerStatus,
    child: Option<ChildHandle>,
    generation: u64,
    last_launch: Option<Instant>,
}

impl SupervisorState {
    fn transition(&mut self, target: WorkerProcessState) -> bool {
        let current = self.status.state;
        if current == target {
            return true;
        }
        if !current.can_transition_to(target) {
            tracing::warn!(from = %current, to = %target, "refused invalid worker state transition");
            return false;
        }
        tracing::info!(from = %current, to = %target, "worker state changed");
        self.status.state = target;
        true
    }
}

struct Inner {
    config: WorkerConfig,
    client: WorkerClient,
    probe: Arc<dyn PortProbe>,
    events: Arc<EventBus>,
    config_dir: PathBuf,
    resource_dir: PathBuf,
    state: Mutex<SupervisorState>,
    status_tx: watch::Sender<WorkerStatus>,
    restarting: AtomicBool,
}

/// Supervises one worker process. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

/// Clears the restart-in-flight flag when dropped.
struct RestartGuard<'a>(&'a AtomicBool);

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ProcessSupervisor {
    /// Supervisor probing the worker port over TCP.
    ///
    /// `config_dir` is exported to the worker as `EVE_CONFIG_DIR`;
    /// `resource_dir` is searched first for `bin/<image>`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Client`] if the HTTP client cannot be built.
    pub fn new(
        config: WorkerConfig,
        config_dir: PathBuf,
        resource_dir: PathBuf,
        events: Arc<EventBus>,
    ) -> Result<Self, SupervisorError> {
        let probe = Arc::new(TcpProbe::new(config.probe_timeout()));
        Self::with_probe(config, config_dir, resource_dir, events, probe)
    }

    /// Supervisor with a caller-supplied liveness probe.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Client`] if the HTTP client cannot be built.
    pub fn with_probe(
        config: WorkerConfig,
        config_dir: PathBuf,
        resource_dir: PathBuf,
        events: Arc<EventBus>,
        probe: Arc<dyn PortProbe>,
    ) -> Result<Self, SupervisorError> {
        let client = WorkerClient::from_config(&config)?;
        let (status_tx, _) = watch::channel(WorkerStatus::default());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                probe,
                events,
                config_dir,
                resource_dir,
                state: Mutex::new(SupervisorState {
                    status: WorkerStatus::default(),
                    child: None,
                    generation: 0,
                    last_launch: None,
                }),
                status_tx,
                restarting: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &WorkerClient {
        &self.inner.client
    }

    /// Current status snapshot.
    pub fn status(&self) -> WorkerStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<WorkerStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn backend_issue(&self) -> bool {
        self.inner.status_tx.borrow().backend_issue
    }

    /// Whether something is listening on the worker port right now.
    pub async fn port_in_use(&self) -> bool {
        let config = &self.inner.config;
        self.inner.probe.is_in_use(&config.host, config.port).await
    }

    /// Launch the worker unless it is already running here or elsewhere.
    ///
    /// At most one launch is attempted per throttle window; a throttled call
    /// returns without launching. Returns the state after the attempt.
    pub async fn start(&self) -> WorkerProcessState {
        self.start_with(StartMode::Explicit).await;
        self.status().state
    }

    async fn start_with(&self, mode: StartMode) {
        if self.lock().child.is_some() {
            tracing::debug!("worker already running; start skipped");
            return;
        }

        if self.port_in_use().await {
            tracing::info!(port = self.inner.config.port, "worker port already in use; treating worker as running");
            self.update(|st| {
                if st.child.is_none() && st.transition(WorkerProcessState::Healthy) {
                    st.status.external = true;
                    st.status.backend_issue = false;
                }
            });
            return;
        }

        self.update(|st| {
            if st.status.external && st.child.is_none() {
                tracing::info!("external worker is gone; launching our own");
                st.transition(WorkerProcessState::Stopped);
                st.status.external = false;
            }
        });

        loop {
            let throttle = self.inner.config.throttle();
            let gate = self.update(|st| {
                if st.child.is_some() || st.status.state == WorkerProcessState::Starting {
                    return Gate::Busy;
                }
                if let Some(last) = st.last_launch {
                    let elapsed = last.elapsed();
                    if elapsed < throttle {
                        return Gate::Throttled(throttle - elapsed);
                    }
                }
                if !st.transition(WorkerProcessState::Starting) {
                    return Gate::Busy;
                }
                st.last_launch = Some(Instant::now());
                st.status.external = false;
                Gate::Go
            });
            match gate {
                Gate::Go => break,
                Gate::Busy => return,
                Gate::Throttled(remaining) if mode == StartMode::Explicit => {
                    tracing::info!(remaining_ms = remaining.as_millis() as u64, "worker start throttled");
                    return;
                }
                Gate::Throttled(remaining) => {
                    tracing::debug!(remaining_ms = remaining.as_millis() as u64, "waiting out restart throttle");
                    tokio::time::sleep(remaining).await;
                    if self.status().state != WorkerProcessState::Restarting {
                        return;
                    }
                }
            }
        }

        self.launch().await;
    }

    async fn launch(&self) {
        let config = &self.inner.config;
        let exe = match locate_worker(&self.inner.resource_dir, &config.candidate_dirs, &config.image_name) {
            Ok(exe) => exe,
            Err(e) => {
                tracing::error!(error = %e, "cannot launch worker");
                self.fail_launch();
                return;
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.inner.config_dir) {
            tracing::warn!(dir = %self.inner.config_dir.display(), error = %e, "failed to create worker config dir");
        }

        let mut child = match self.spawn_child(&exe) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, "cannot launch worker");
                self.fail_launch();
                return;
            }
        };

        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let kill = CancellationToken::new();
        let (exited_tx, exited_rx) = oneshot::channel();
        let generation = self.update(|st| {
            if st.status.state != WorkerProcessState::Starting {
                return None;
            }
            st.generation += 1;
            st.child = Some(ChildHandle {
                generation: st.generation,
                kill: kill.clone(),
                exited: exited_rx,
            });
            st.status.pid = pid;
            st.status.started_at = Some(Utc::now());
            st.status.launch_count += 1;
            Some(st.generation)
        });
        let Some(generation) = generation else {
            tracing::info!("worker stop requested during launch; killing new process");
            let _ = child.start_kill();
            return;
        };

        tracing::info!(path = %exe.display(), pid = ?pid, generation, "worker launched");
        tokio::spawn(self.clone().watch_exit(child, generation, kill, exited_tx));
        tokio::spawn(self.clone().promote_after_grace(generation));
    }

    fn spawn_child(&self, exe: &Path) -> Result<Child, SupervisorError> {
        let mut cmd = tokio::process::Command::new(exe);
        cmd.args(&self.inner.config.args)
            .env(CONFIG_DIR_ENV, &self.inner.config_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = exe.parent() {
            cmd.current_dir(dir);
        }
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000);

        cmd.spawn().map_err(|source| SupervisorError::Spawn {
            path: exe.to_path_buf(),
            source,
        })
    }

    fn fail_launch(&self) {
        self.update(|st| {
            st.transition(WorkerProcessState::Unhealthy);
            st.status.backend_issue = true;
        });
    }

    async fn promote_after_grace(self, generation: u64) {
        tokio::time::sleep(self.inner.config.startup_grace()).await;
        self.update(|st| {
            let current = st.child.as_ref().map(|c| c.generation);
            if current == Some(generation)
                && st.status.state == WorkerProcessState::Starting
                && st.transition(WorkerProcessState::Healthy)
            {
                st.status.backend_issue = false;
            }
        });
    }

    async fn watch_exit(
        self,
        mut child: Child,
        generation: u64,
        kill: CancellationToken,
        exited_tx: oneshot::Sender<()>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill worker");
                }
                child.wait().await
            }
        };
        let _ = exited_tx.send(());
        let code = match status {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to reap worker");
                None
            }
        };
        tracing::info!(code = ?code, generation, "worker exited");
        self.handle_exit(generation, code).await;
    }

    async fn handle_exit(&self, generation: u64, code: Option<i32>) {
        let proceed = self.update(|st| {
            if st.child.as_ref().map(|c| c.generation) != Some(generation) {
                tracing::debug!(generation, "ignoring exit of a previous worker");
                return false;
            }
            st.child = None;
            st.status.pid = None;
            st.status.last_exit_code = code;
            !matches!(
                st.status.state,
                WorkerProcessState::ShuttingDown | WorkerProcessState::Stopped
            )
        });
        if !proceed {
            return;
        }

        let port_busy = self.port_in_use().await;
        let max_restart = self.inner.config.max_restart;
        let schedule = self.update(|st| {
            if matches!(
                st.status.state,
                WorkerProcessState::ShuttingDown | WorkerProcessState::Stopped
            ) || st.child.is_some()
            {
                return None;
            }
            if port_busy {
                tracing::warn!("worker exited but its port is still in use; assuming an orphan");
                st.transition(WorkerProcessState::Unhealthy);
                st.status.backend_issue = true;
                return None;
            }
            if code == Some(0) {
                st.transition(WorkerProcessState::Stopped);
                return None;
            }
            if st.status.restart_count < max_restart {
                if !st.transition(WorkerProcessState::Restarting) {
                    return None;
                }
                st.status.restart_count += 1;
                st.status.backend_issue = true;
                return Some(st.status.restart_count);
            }
            tracing::error!(max_restart, "worker restart budget exhausted");
            st.transition(WorkerProcessState::Unhealthy);
            st.status.backend_issue = true;
            None
        });

        if let Some(attempt) = schedule {
            tokio::spawn(self.clone().restart_after_delay(attempt));
        }
    }

    /// Boxed to break the `start_with` -> `launch` -> `handle_exit` cycle.
    fn restart_after_delay(self, attempt: u32) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tokio::time::sleep(self.inner.config.restart_delay()).await;
            if self.status().state != WorkerProcessState::Restarting {
                tracing::debug!(attempt, "scheduled worker restart abandoned");
                return;
            }
            tracing::info!(attempt, max = self.inner.config.max_restart, "restarting worker");
            self.start_with(StartMode::Auto).await;
        })
    }

    /// Stop the worker without triggering an automatic restart.
    ///
    /// Disarms the restart budget, asks the worker to exit through
    /// `/shutdown`, then polls the port every `poll_interval` until it is
    /// free or `timeout` passes. On timeout with `fallback_kill`, the child
    /// is killed and, if configured, every process with the worker's image
    /// name. Always ends in `Stopped`.
    pub async fn graceful_stop(
        &self,
        timeout: Duration,
        poll_interval: Duration,
        fallback_kill: bool,
    ) -> StopOutcome {
        let max_restart = self.inner.config.max_restart;
        self.update(|st| {
            st.status.restart_count = max_restart;
            st.transition(WorkerProcessState::ShuttingDown);
        });

        if !self.port_in_use().await {
            tracing::info!("worker port is free; nothing to stop");
            self.kill_child().await;
            self.finish_stop();
            return StopOutcome::NotRunning;
        }

        match self.inner.client.shutdown().await {
            Ok(()) => tracing::info!("worker accepted shutdown request"),
            Err(e) => tracing::warn!(error = %e, "worker shutdown request failed"),
        }

        let deadline = Instant::now() + timeout;
        loop {
            if !self.port_in_use().await {
                tracing::info!("worker released its port");
                self.kill_child().await;
                self.finish_stop();
                return StopOutcome::Graceful;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }

        tracing::warn!(timeout_ms = timeout.as_millis() as u64, "worker did not release its port in time");
        if !fallback_kill {
            self.finish_stop();
            return StopOutcome::TimedOut;
        }
        self.kill_child().await;
        if self.inner.config.kill_by_name {
            kill_by_image_name(&self.inner.config.image_name).await;
        }
        self.finish_stop();
        StopOutcome::ForceKilled
    }

    /// [`graceful_stop`](Self::graceful_stop) with the default deadline,
    /// poll interval and forced kill.
    pub async fn stop(&self) -> StopOutcome {
        self.graceful_stop(DEFAULT_STOP_TIMEOUT, DEFAULT_STOP_POLL, true)
            .await
    }

    fn finish_stop(&self) {
        self.update(|st| {
            st.transition(WorkerProcessState::Stopped);
            st.status.pid = None;
            st.status.external = false;
        });
    }

    async fn kill_child(&self) {
        let handle = self.update(|st| {
            st.status.pid = None;
            st.child.take()
        });
        if let Some(handle) = handle {
            handle.kill.cancel();
            if tokio::time::timeout(KILL_WAIT, handle.exited).await.is_err() {
                tracing::warn!(generation = handle.generation, "worker did not exit after kill");
            }
        }
    }

    /// Stop the worker and start it again with a fresh restart budget.
    ///
    /// Concurrent calls collapse into one; the callers that lose return
    /// `false` immediately.
    pub async fn restart(&self) -> bool {
        if self.inner.restarting.swap(true, Ordering::AcqRel) {
            tracing::info!("worker restart already in progress");
            return false;
        }
        let _guard = RestartGuard(&self.inner.restarting);
        tracing::info!("restarting worker on request");

        self.update(|st| {
            st.status.restart_count = 0;
            st.status.backend_issue = false;
            st.last_launch = None;
        });
        self.graceful_stop(RESTART_STOP_TIMEOUT, DEFAULT_STOP_POLL, true)
            .await;
        tokio::time::sleep(self.inner.config.restart_settle()).await;
        self.update(|st| {
            st.status.restart_count = 0;
            st.last_launch = None;
        });
        self.start().await;
        true
    }

    /// Poll the worker port until it accepts connections or `timeout`
    /// elapses. Returns whether the worker became ready.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.port_in_use().await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(READY_POLL.min(deadline - now)).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `f` against the state, publish the resulting status and raise the
    /// matching events outside the lock.
    fn update<R>(&self, f: impl FnOnce(&mut SupervisorState) -> R) -> R {
        let (result, before, after) = {
            let mut st = self.lock();
            let before = st.status.clone();
            let result = f(&mut st);
            let after = st.status.clone();
            if before != after {
                self.inner.status_tx.send_replace(after.clone());
            }
            (result, before, after)
        };
        if before.state != after.state {
            self.inner
                .events
                .publish(&CoreEvent::WorkerState(after.clone()));
        }
        if before.backend_issue != after.backend_issue {
            self.inner
                .events
                .publish(&CoreEvent::BackendIssue(after.backend_issue));
        }
        result
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("image", &self.inner.config.image_name)
            .field("port", &self.inner.config.port)
            .field("status", &self.status())
            .finish()
    }
}

async fn forward_output<R: AsyncRead + Unpin>(reader: R, stream: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                if stream == "stderr" {
                    tracing::warn!(target: "eve::worker", stream, "{line}");
                } else {
                    tracing::info!(target: "eve::worker", stream, "{line}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(target: "eve::worker", stream, error = %e, "worker output closed");
                break;
            }
        }
    }
}
