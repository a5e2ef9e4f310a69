//! The assembled core.
//!
//! [`EveCore`] is the one context object the host builds at startup. It owns
//! the worker supervisor, the status bridge and the config hot-reload engine,
//! wires all three to a shared [`EventBus`] and a single set of sinks, and
//! exposes the imperative operations the UI needs.

use crate::bridge::{self, StatusBridge};
use crate::config::CoreConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::fanout::{FanoutBroadcaster, Sink, SinkEnumerator};
use crate::reload::{ConfigCallbacks, ConfigHotReloadEngine, DocumentName, validate_commands};
use crate::supervisor::{ProcessSupervisor, StopOutcome};
use crate::worker::{TerminalResponse, WorkerClient};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pointer of the startup-only immersive mode flag inside `ui.json`.
const IMMERSIVE_MODE_POINTER: &str = "/ui/default_immersive_mode";

pub struct EveCore {
    config: CoreConfig,
    events: Arc<EventBus>,
    broadcaster: FanoutBroadcaster,
    supervisor: ProcessSupervisor,
    bridge: StatusBridge,
    engine: ConfigHotReloadEngine,
    callbacks: ConfigCallbacks,
}

impl EveCore {
    /// Build the core, looking for the worker under the packaged resource
    /// directory.
    ///
    /// # Errors
    ///
    /// Fails if `config` is invalid or the worker HTTP client cannot be built.
    pub fn new(config: CoreConfig, sinks: SinkEnumerator) -> Result<Self> {
        Self::with_resource_dir(config, sinks, crate::eve_dirs::resource_dir())
    }

    /// Build the core with an explicit resource directory.
    ///
    /// # Errors
    ///
    /// Fails if `config` does not pass [`CoreConfig::validate`] or the worker
    /// HTTP client cannot be built.
    pub fn with_resource_dir(
        config: CoreConfig,
        sinks: SinkEnumerator,
        resource_dir: PathBuf,
    ) -> Result<Self> {
        config.validate()?;
        let events = Arc::new(EventBus::new());
        let broadcaster = FanoutBroadcaster::new(sinks);
        let config_dir = config.reload.resolved_config_dir();

        let supervisor = ProcessSupervisor::new(
            config.worker.clone(),
            config_dir.clone(),
            resource_dir,
            Arc::clone(&events),
        )?;
        let bridge = StatusBridge::new(
            config.bridge.clone(),
            supervisor.client().clone(),
            bridge::stream_url(&config.worker, &config.bridge),
            broadcaster.clone(),
            Arc::clone(&events),
        )
        .with_supervisor(supervisor.clone());
        let engine = ConfigHotReloadEngine::new(
            config_dir,
            config.reload.debounce(),
            Arc::clone(&events),
        );

        Ok(Self {
            config,
            events,
            broadcaster,
            supervisor,
            bridge,
            engine,
            callbacks: ConfigCallbacks::default(),
        })
    }

    /// Callbacks invoked on document changes, in addition to the
    /// [`EventBus`] notifications.
    pub fn with_callbacks(mut self, callbacks: ConfigCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn bridge(&self) -> &StatusBridge {
        &self.bridge
    }

    pub fn engine(&self) -> &ConfigHotReloadEngine {
        &self.engine
    }

    /// Start the worker, then the status bridge (which waits a bounded time
    /// for the worker), then load and watch the config documents.
    ///
    /// A worker that fails to start does not fail this call; it shows up as
    /// the backend-issue flag instead.
    ///
    /// # Errors
    ///
    /// Fails if the config engine cannot be initialized.
    pub async fn start(&self) -> Result<()> {
        tracing::info!(
            port = self.config.worker.port,
            image = %self.config.worker.image_name,
            config_dir = %self.engine.config_dir().display(),
            "starting eve core"
        );
        let state = self.supervisor.start().await;
        tracing::info!(state = %state, "worker start requested");

        self.bridge.start().await;

        self.engine
            .initialize(self.broadcaster.clone(), self.engine_callbacks())
            .await?;
        Ok(())
    }

    /// Stop the bridge, the config engine and the worker, in that order.
    pub async fn shutdown(&self) -> StopOutcome {
        tracing::info!("shutting down eve core");
        self.bridge.stop().await;
        self.engine.destroy();
        let outcome = self.supervisor.stop().await;
        tracing::info!(outcome = ?outcome, "eve core stopped");
        outcome
    }

    /// Restart the worker with a fresh restart budget. Returns `false` if a
    /// restart was already in progress.
    pub async fn restart_services(&self) -> bool {
        self.supervisor.restart().await
    }

    /// Fetch every polled status topic once. Returns how many succeeded.
    pub async fn refresh_all(&self) -> usize {
        self.bridge.refresh_all().await
    }

    pub async fn run_terminal(&self, input: &str) -> TerminalResponse {
        self.supervisor.client().run_terminal(input).await
    }

    /// Bring a newly created sink up to date with every retained status
    /// snapshot and the current config documents.
    pub fn replay_to(&self, sink: &dyn Sink) -> usize {
        let mut delivered = self.bridge.replay_to(sink);
        for name in DocumentName::ALL {
            if let Some(value) = self.engine.current(name) {
                let channel = crate::fanout::Channel::ConfigUpdate(name);
                if FanoutBroadcaster::deliver_to(sink, &channel, &value) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn backend_issue(&self) -> bool {
        self.supervisor.backend_issue()
    }

    /// Whether `ui.json` as loaded asks to start in immersive mode (`"on"`,
    /// any case). Applied once at startup; later edits are never broadcast.
    pub fn default_immersive_mode(&self) -> Option<bool> {
        let ui = self.engine.full(DocumentName::Ui)?;
        let mode = ui.pointer(IMMERSIVE_MODE_POINTER)?.as_str()?;
        Some(mode.eq_ignore_ascii_case("on"))
    }

    /// The caller's callbacks, with `commands` changes additionally validated
    /// and announced to the worker.
    fn engine_callbacks(&self) -> ConfigCallbacks {
        let mut callbacks = self.callbacks.clone();
        let user = callbacks.on_commands_change.take();
        let client = self.supervisor.client().clone();
        callbacks.on_commands_change = Some(Arc::new(move |value: &Value, path: &Path| {
            if let Some(user) = &user {
                user(value, path);
            }
            match validate_commands(value) {
                Ok(count) => notify_commands_reload(client.clone(), count),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "commands failed validation; worker not notified");
                }
            }
        }));
        callbacks
    }
}

/// Fire-and-forget `POST /reload-commands`.
fn notify_commands_reload(client: WorkerClient, count: usize) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("no runtime available; worker not notified of commands change");
        return;
    };
    handle.spawn(async move {
        match client.reload_commands().await {
            Ok(()) => tracing::info!(commands = count, "worker reloaded commands"),
            Err(e) => tracing::warn!(error = %e, "reload-commands request failed"),
        }
    });
}

impl std::fmt::Debug for EveCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EveCore")
            .field("worker", &self.supervisor.status())
            .field("bridge", &self.bridge)
            .field("config_dir", &self.engine.config_dir())
            .finish()
    }
}
