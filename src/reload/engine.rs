//! The config hot-reload engine.

use super::{ConfigDocument, DocumentName, FieldPolicy, ReloadError, default_document};
use crate::events::{CoreEvent, EventBus};
use crate::fanout::{Channel, FanoutBroadcaster};
use crate::store::{AtomicConfigStore, StoreError};
use crate::watcher::{DebouncedWatcher, WatchEvent, WatchEventKind};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type ConfigCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type CommandsCallback = Arc<dyn Fn(&Value, &Path) + Send + Sync>;

/// Change callbacks handed to [`ConfigHotReloadEngine::initialize`].
#[derive(Clone, Default)]
pub struct ConfigCallbacks {
    pub on_theme_change: Option<ConfigCallback>,
    pub on_ui_change: Option<ConfigCallback>,
    pub on_commands_change: Option<CommandsCallback>,
}

impl ConfigCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_theme_change(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_theme_change = Some(Arc::new(f));
        self
    }

    pub fn on_ui_change(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_ui_change = Some(Arc::new(f));
        self
    }

    pub fn on_commands_change(mut self, f: impl Fn(&Value, &Path) + Send + Sync + 'static) -> Self {
        self.on_commands_change = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for ConfigCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCallbacks")
            .field("on_theme_change", &self.on_theme_change.is_some())
            .field("on_ui_change", &self.on_ui_change.is_some())
            .field("on_commands_change", &self.on_commands_change.is_some())
            .finish()
    }
}

/// Check the minimal shape of a `commands` document: an object with a
/// `commands` array whose entries are objects carrying `id` and `action`.
///
/// Returns the number of commands.
///
/// # Errors
///
/// Returns [`ReloadError::InvalidCommands`] describing the first problem.
pub fn validate_commands(value: &Value) -> Result<usize, ReloadError> {
    let invalid = |reason: String| ReloadError::InvalidCommands { reason };
    let list = value
        .get("commands")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing `commands` array".into()))?;
    for (index, entry) in list.iter().enumerate() {
        let Some(entry) = entry.as_object() else {
            return Err(invalid(format!("entry {index} is not an object")));
        };
        for key in ["id", "action"] {
            if !entry.contains_key(key) {
                return Err(invalid(format!("entry {index} has no `{key}`")));
            }
        }
    }
    Ok(list.len())
}

#[derive(Default)]
struct EngineState {
    docs: HashMap<DocumentName, ConfigDocument>,
    callbacks: ConfigCallbacks,
    broadcaster: Option<FanoutBroadcaster>,
    watcher: Option<DebouncedWatcher>,
    cancel: Option<CancellationToken>,
    initialized: bool,
}

struct EngineInner {
    store: AtomicConfigStore,
    debounce: Duration,
    events: Arc<EventBus>,
    policies: HashMap<DocumentName, FieldPolicy>,
    state: Mutex<EngineState>,
}

/// Owns the `theme`, `ui` and `commands` documents: seeds and loads them at
/// startup, then reloads them on file change and fans the result out.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConfigHotReloadEngine {
    inner: Arc<EngineInner>,
}

impl ConfigHotReloadEngine {
    pub fn new(config_dir: impl Into<PathBuf>, debounce: Duration, events: Arc<EventBus>) -> Self {
        let policies = DocumentName::ALL
            .into_iter()
            .map(|name| (name, FieldPolicy::for_document(name)))
            .collect();
        Self {
            inner: Arc::new(EngineInner {
                store: AtomicConfigStore::new(config_dir),
                debounce,
                events,
                policies,
                state: Mutex::new(EngineState::default()),
            }),
        }
    }

    /// Replace the built-in policy for one document. Only meaningful before
    /// [`initialize`](Self::initialize).
    pub fn with_policy(self, name: DocumentName, policy: FieldPolicy) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.policies.insert(name, policy);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => {
                tracing::warn!(doc = %name, "engine already shared; policy override ignored");
                Self { inner }
            }
        }
    }

    /// Seed, load and deliver every document, then start watching them.
    ///
    /// Each callback runs once with the full loaded value (startup-only
    /// fields included) and `<name>:update` is broadcast. A file that fails
    /// to parse is left untouched and its built-in default is used in memory.
    ///
    /// # Errors
    ///
    /// [`ReloadError::AlreadyInitialized`] on a second call, or a store error
    /// if the config directory cannot be created.
    pub async fn initialize(
        &self,
        broadcaster: FanoutBroadcaster,
        callbacks: ConfigCallbacks,
    ) -> Result<(), ReloadError> {
        {
            let mut state = self.inner.lock();
            if state.initialized {
                return Err(ReloadError::AlreadyInitialized);
            }
            state.initialized = true;
            state.callbacks = callbacks;
            state.broadcaster = Some(broadcaster);
        }

        if let Err(e) = self.inner.store.ensure_dir().await {
            let mut state = self.inner.lock();
            state.initialized = false;
            state.callbacks = ConfigCallbacks::default();
            state.broadcaster = None;
            return Err(e.into());
        }

        for name in DocumentName::ALL {
            let doc = self.inner.load_document(name).await;
            let body = doc.body.clone();
            self.inner.lock().docs.insert(name, doc);
            self.inner.deliver(name, &body);
        }

        self.start_watching();
        tracing::info!(dir = %self.config_dir().display(), "config hot-reload initialized");
        Ok(())
    }

    fn start_watching(&self) {
        let cancel = CancellationToken::new();
        let (mut watcher, rx) = DebouncedWatcher::new(self.inner.debounce, cancel.clone());
        let paths: Vec<PathBuf> = DocumentName::ALL
            .into_iter()
            .map(|name| self.inner.store.path_for(name.as_str()))
            .collect();
        if let Err(e) = watcher.watch(&paths) {
            tracing::error!(error = %e, "failed to watch config files; hot reload disabled");
        }
        tokio::spawn(consume_changes(
            Arc::downgrade(&self.inner),
            rx,
            cancel.clone(),
        ));

        let mut state = self.inner.lock();
        state.watcher = Some(watcher);
        state.cancel = Some(cancel);
    }

    /// Queue a reload of `name` through the debouncer, as if the file had
    /// been edited. No-op before initialization.
    pub fn request_reload(&self, name: DocumentName) {
        let state = self.inner.lock();
        if let Some(watcher) = &state.watcher {
            watcher.trigger(self.inner.store.path_for(name.as_str()));
        }
    }

    /// Cancel pending reloads, stop watching and drop the callbacks.
    ///
    /// Idempotent and safe before [`initialize`](Self::initialize). Loaded
    /// values stay readable; the engine may be initialized again.
    pub fn destroy(&self) {
        let mut state = self.inner.lock();
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        if let Some(mut watcher) = state.watcher.take() {
            watcher.close();
        }
        state.callbacks = ConfigCallbacks::default();
        state.broadcaster = None;
        if state.initialized {
            tracing::info!("config hot-reload stopped");
        }
        state.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    /// Current value of `name` as subscribers see it (startup-only fields
    /// stripped).
    pub fn current(&self, name: DocumentName) -> Option<Value> {
        let body = self.full(name)?;
        Some(self.inner.policy(name).strip(&body))
    }

    /// Current value of `name` including startup-only fields.
    pub fn full(&self, name: DocumentName) -> Option<Value> {
        self.inner.lock().docs.get(&name).map(|d| d.body.clone())
    }

    pub fn document(&self, name: DocumentName) -> Option<ConfigDocument> {
        self.inner.lock().docs.get(&name).cloned()
    }

    pub fn config_dir(&self) -> &Path {
        self.inner.store.dir()
    }

    /// Backing file of `name`.
    pub fn path_for(&self, name: DocumentName) -> PathBuf {
        self.inner.store.path_for(name.as_str())
    }
}

impl std::fmt::Debug for ConfigHotReloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHotReloadEngine")
            .field("config_dir", &self.config_dir())
            .field("debounce", &self.inner.debounce)
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn policy(&self, name: DocumentName) -> FieldPolicy {
        self.policies.get(&name).cloned().unwrap_or_default()
    }

    async fn load_document(&self, name: DocumentName) -> ConfigDocument {
        let default = default_document(name);
        if let Err(e) = self.store.seed_if_missing(name.as_str(), &default).await {
            tracing::warn!(doc = %name, error = %e, "failed to seed default document");
        }
        let body = match self.store.read(name.as_str()).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(doc = %name, error = %e, "failed to load config; using built-in defaults");
                default
            }
        };
        ConfigDocument::new(name, body, self.store.path_for(name.as_str()))
    }

    async fn handle_change(&self, event: WatchEvent) {
        let Some(name) = DocumentName::from_path(&event.path) else {
            return;
        };
        if !self.lock().initialized {
            return;
        }
        if event.kind == WatchEventKind::Removed {
            tracing::warn!(doc = %name, "config file removed; keeping previous value");
            return;
        }

        let body = match self.store.read(name.as_str()).await {
            Ok(body) => body,
            Err(StoreError::NotFound { .. }) => {
                tracing::warn!(doc = %name, "config file removed; keeping previous value");
                return;
            }
            Err(e) => {
                tracing::warn!(doc = %name, error = %e, "failed to reload config; keeping previous value");
                return;
            }
        };

        let stripped = self.policy(name).strip(&body);
        let doc = ConfigDocument::new(name, body, event.path);
        self.lock().docs.insert(name, doc);
        self.deliver(name, &stripped);
        tracing::info!(doc = %name, "config hot-reloaded");
    }

    /// Broadcast `payload` on `<name>:update`, run the matching callback and
    /// publish the change event. Runs with the state lock released.
    fn deliver(&self, name: DocumentName, payload: &Value) {
        let (callbacks, broadcaster) = {
            let state = self.lock();
            (state.callbacks.clone(), state.broadcaster.clone())
        };
        if let Some(broadcaster) = broadcaster {
            broadcaster.broadcast(&Channel::ConfigUpdate(name), payload);
        }

        let event = match name {
            DocumentName::Theme => {
                if let Some(cb) = &callbacks.on_theme_change {
                    guarded(name, || cb(payload));
                }
                CoreEvent::ThemeChanged(payload.clone())
            }
            DocumentName::Ui => {
                if let Some(cb) = &callbacks.on_ui_change {
                    guarded(name, || cb(payload));
                }
                CoreEvent::UiChanged(payload.clone())
            }
            DocumentName::Commands => {
                let path = self.store.path_for(name.as_str());
                if let Some(cb) = &callbacks.on_commands_change {
                    guarded(name, || cb(payload, &path));
                }
                CoreEvent::CommandsChanged {
                    value: payload.clone(),
                    path,
                }
            }
        };
        self.events.publish(&event);
    }
}

fn guarded(name: DocumentName, f: impl FnOnce()) {
    if std::panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(doc = %name, "config change callback panicked");
    }
}

/// Single consumer of debounced changes, so reloads never overlap.
async fn consume_changes(
    engine: Weak<EngineInner>,
    mut rx: mpsc::UnboundedReceiver<WatchEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(inner) = engine.upgrade() else {
            break;
        };
        inner.handle_change(event).await;
    }
    tracing::debug!("config change consumer stopped");
}
