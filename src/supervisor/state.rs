//! Worker lifecycle states and the published status snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the supervised worker.
///
/// ```text
/// Stopped ──→ Starting ──→ Healthy ──→ Restarting ──→ Starting
///    ↑           │            │            │
///    │           ↓            ↓            ↓
///    │       Unhealthy ──→ ShuttingDown ←──┘
///    └──────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerProcessState {
    Stopped,
    Starting,
    Healthy,
    Unhealthy,
    Restarting,
    ShuttingDown,
}

impl WorkerProcessState {
    /// Returns `true` if a transition from `self` to `target` is valid.
    ///
    /// - `Stopped | Unhealthy → Starting` (explicit start)
    /// - `Starting → Healthy | Unhealthy | Restarting | Stopped`
    /// - `Healthy → Restarting | Unhealthy | Stopped`
    /// - `Restarting → Starting | Unhealthy`
    /// - `Stopped | Healthy | Unhealthy | Starting | Restarting → ShuttingDown`
    /// - `ShuttingDown → Stopped`
    /// - `Stopped | Unhealthy | Restarting → Healthy` (worker found already running)
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Stopped, Self::Starting)
                | (Self::Unhealthy, Self::Starting)
                | (Self::Starting, Self::Healthy)
                | (Self::Starting, Self::Unhealthy)
                | (Self::Starting, Self::Stopped)
                | (Self::Starting, Self::Restarting)
                | (Self::Healthy, Self::Restarting)
                | (Self::Healthy, Self::Unhealthy)
                | (Self::Healthy, Self::Stopped)
                | (Self::Restarting, Self::Starting)
                | (Self::Restarting, Self::Unhealthy)
                | (Self::Stopped, Self::ShuttingDown)
                | (Self::Starting, Self::ShuttingDown)
                | (Self::Healthy, Self::ShuttingDown)
                | (Self::Unhealthy, Self::ShuttingDown)
                | (Self::Restarting, Self::ShuttingDown)
                | (Self::ShuttingDown, Self::Stopped)
                | (Self::Stopped, Self::Healthy)
                | (Self::Unhealthy, Self::Healthy)
                | (Self::Restarting, Self::Healthy)
        )
    }

    /// A child process is expected to exist in this state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Healthy)
    }
}

impl fmt::Display for WorkerProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Restarting => "restarting",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(label)
    }
}

/// Read-only snapshot of the worker, published on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub state: WorkerProcessState,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    /// Automatic restarts spent from the budget.
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub backend_issue: bool,
    /// Successful spawns this session.
    pub launch_count: u32,
    /// The port was already held by a process this supervisor did not spawn.
    pub external: bool,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            state: WorkerProcessState::Stopped,
            pid: None,
            started_at: None,
            restart_count: 0,
            last_exit_code: None,
            backend_issue: false,
            launch_count: 0,
            external: false,
        }
    }
}

/// How [`graceful_stop`](super::ProcessSupervisor::graceful_stop) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was listening on the worker port.
    NotRunning,
    /// The worker released the port after the shutdown request.
    Graceful,
    /// The port was still busy at the deadline and the worker was killed.
    ForceKilled,
    /// The port was still busy at the deadline and no kill was requested.
    TimedOut,
}
