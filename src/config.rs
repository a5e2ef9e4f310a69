//! Configuration types for the eve core.
//!
//! Settings live in `eve.toml` next to the config documents. Every section is
//! optional; missing keys fall back to the defaults below.

use crate::error::{EveError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Worker process supervision settings.
    pub worker: WorkerConfig,
    /// Status bridge settings (stream + polling).
    pub bridge: BridgeConfig,
    /// Config document hot-reload settings.
    pub reload: ReloadConfig,
}

impl CoreConfig {
    /// Load settings from a TOML file.
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EveError::Config`] if the file exists but cannot be read,
    /// parsed, or fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(EveError::Config(format!(
                    "failed to read settings file '{}': {e}",
                    path.display()
                )));
            }
        };
        let config: Self = toml::from_str(&text).map_err(|e| {
            EveError::Config(format!(
                "failed to parse settings file '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can never work.
    ///
    /// # Errors
    ///
    /// Returns [`EveError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.worker.port == 0 {
            return Err(EveError::Config("worker.port must be non-zero".into()));
        }
        if self.worker.image_name.trim().is_empty() {
            return Err(EveError::Config("worker.image_name must not be empty".into()));
        }
        if self.reload.debounce_ms == 0 {
            return Err(EveError::Config("reload.debounce_ms must be > 0".into()));
        }
        if self.bridge.backoff_factor < 1.0 {
            return Err(EveError::Config("bridge.backoff_factor must be >= 1.0".into()));
        }
        let bridge = &self.bridge;
        if bridge.backoff_initial_ms == 0 || bridge.backoff_max_ms < bridge.backoff_initial_ms {
            return Err(EveError::Config(
                "bridge.backoff_max_ms must be >= backoff_initial_ms > 0".into(),
            ));
        }
        if self.bridge.heartbeat_secs == 0 {
            return Err(EveError::Config("bridge.heartbeat_secs must be > 0".into()));
        }
        if !self.bridge.stream_path.starts_with('/') {
            return Err(EveError::Config("bridge.stream_path must start with '/'".into()));
        }
        Ok(())
    }
}

/// Worker process supervision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Loopback host the worker binds to.
    pub host: String,
    /// TCP port used for liveness probing and HTTP calls.
    pub port: u16,
    /// Executable file name, also used for kill-by-name.
    pub image_name: String,
    /// Extra arguments passed to the worker.
    pub args: Vec<String>,
    /// Development fallback directories searched after the packaged `bin/` dir.
    pub candidate_dirs: Vec<PathBuf>,
    /// Maximum automatic restarts before giving up.
    pub max_restart: u32,
    /// Delay before an automatic restart.
    pub restart_delay_ms: u64,
    /// Minimum spacing between launch attempts.
    pub throttle_ms: u64,
    /// Time a freshly spawned worker must survive to count as healthy.
    pub startup_grace_ms: u64,
    /// Timeout for a single TCP liveness probe.
    pub probe_timeout_ms: u64,
    /// Timeout for ordinary HTTP calls to the worker.
    pub request_timeout_ms: u64,
    /// Timeout for the `/shutdown` control request.
    pub shutdown_request_timeout_ms: u64,
    /// Pause between stop and start during an explicit restart.
    pub restart_settle_ms: u64,
    /// Whether forced stop also kills every process with `image_name`.
    pub kill_by_name: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 54321,
            image_name: default_image_name().to_owned(),
            args: Vec::new(),
            candidate_dirs: Vec::new(),
            max_restart: 5,
            restart_delay_ms: 1500,
            throttle_ms: 3000,
            startup_grace_ms: 500,
            probe_timeout_ms: 600,
            request_timeout_ms: 5000,
            shutdown_request_timeout_ms: 2000,
            restart_settle_ms: 800,
            kill_by_name: true,
        }
    }
}

impl WorkerConfig {
    /// Base URL for HTTP calls, e.g. `http://127.0.0.1:54321`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_request_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_request_timeout_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }
}

fn default_image_name() -> &'static str {
    if cfg!(windows) {
        "EveServer.exe"
    } else {
        "EveServer"
    }
}

/// Status bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Whether the streaming connection is opened at all.
    pub stream_enabled: bool,
    /// WebSocket path on the worker port.
    pub stream_path: String,
    /// Interval between heartbeat pings.
    pub heartbeat_secs: u64,
    /// First reconnect delay.
    pub backoff_initial_ms: u64,
    /// Reconnect delay multiplier.
    pub backoff_factor: f64,
    /// Reconnect delay cap.
    pub backoff_max_ms: u64,
    /// Timeout for establishing the WebSocket connection.
    pub connect_timeout_ms: u64,
    /// Delay before the out-of-band fetch issued on start.
    pub initial_fetch_delay_ms: u64,
    /// How long `start()` waits for the worker port to accept connections.
    pub ready_timeout_ms: u64,
    /// Per-topic poll intervals.
    pub poll: PollConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            stream_enabled: true,
            stream_path: "/ws".to_owned(),
            heartbeat_secs: 15,
            backoff_initial_ms: 1000,
            backoff_factor: 1.8,
            backoff_max_ms: 15_000,
            connect_timeout_ms: 5000,
            initial_fetch_delay_ms: 300,
            ready_timeout_ms: 10_000,
            poll: PollConfig::default(),
        }
    }
}

impl BridgeConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn initial_fetch_delay(&self) -> Duration {
        Duration::from_millis(self.initial_fetch_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Poll intervals in milliseconds. Zero disables polling for that topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub media_ms: u64,
    pub disk_ms: u64,
    pub recyclebin_ms: u64,
    pub quote_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            media_ms: 2_000,
            disk_ms: 60_000,
            recyclebin_ms: 60_000,
            quote_ms: 600_000,
        }
    }
}

/// Config document hot-reload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Quiet period used to coalesce bursts of file events.
    pub debounce_ms: u64,
    /// Directory holding the documents (None = [`crate::eve_dirs::config_dir`]).
    pub config_dir: Option<PathBuf>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 150,
            config_dir: None,
        }
    }
}

impl ReloadConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Resolved document directory.
    #[must_use]
    pub fn resolved_config_dir(&self) -> PathBuf {
        self.config_dir
            .clone()
            .unwrap_or_else(crate::eve_dirs::config_dir)
    }
}
