//! Typed publish/subscribe registry for core events.
//!
//! Subscribers register for one [`EventKind`] and receive the matching
//! [`CoreEvent`] payloads. The `on_*` helpers cover the callback points the UI
//! layer uses (theme/ui/commands changes, media status, stream connectivity,
//! backend health).

use crate::supervisor::WorkerStatus;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Discriminant used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ThemeChanged,
    UiChanged,
    CommandsChanged,
    MediaStatus,
    ConnectChanged,
    BackendIssue,
    WorkerState,
}

/// Events published by the core.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// `theme` document loaded or reloaded.
    ThemeChanged(Value),
    /// `ui` document loaded or reloaded (startup-only fields stripped on reload).
    UiChanged(Value),
    /// `commands` document loaded or reloaded.
    CommandsChanged {
        value: Value,
        /// Backing file of the document.
        path: PathBuf,
    },
    /// Media playback status recognized on the event stream.
    MediaStatus(String),
    /// Streaming connection went up (`true`) or down (`false`).
    ConnectChanged(bool),
    /// Backend-issue indicator raised (`true`) or cleared (`false`).
    BackendIssue(bool),
    /// Worker lifecycle snapshot after a state transition.
    WorkerState(WorkerStatus),
}

impl CoreEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ThemeChanged(_) => EventKind::ThemeChanged,
            Self::UiChanged(_) => EventKind::UiChanged,
            Self::CommandsChanged { .. } => EventKind::CommandsChanged,
            Self::MediaStatus(_) => EventKind::MediaStatus,
            Self::ConnectChanged(_) => EventKind::ConnectChanged,
            Self::BackendIssue(_) => EventKind::BackendIssue,
            Self::WorkerState(_) => EventKind::WorkerState,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&CoreEvent) + Send + Sync>;

/// Registry of event handlers keyed by [`EventKind`].
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&CoreEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|p| p.into_inner());
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler of its kind.
    ///
    /// Handlers run outside the registry lock, so they may subscribe or
    /// unsubscribe. A panicking handler is logged and does not prevent the
    /// others from running. Returns the number of handlers invoked.
    pub fn publish(&self, event: &CoreEvent) -> usize {
        let targets: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
            handlers
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in &targets {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(kind = ?event.kind(), "event handler panicked");
            }
        }
        targets.len()
    }

    pub fn on_theme_change<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ThemeChanged, move |e| {
            if let CoreEvent::ThemeChanged(v) = e {
                f(v);
            }
        })
    }

    pub fn on_ui_change<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::UiChanged, move |e| {
            if let CoreEvent::UiChanged(v) = e {
                f(v);
            }
        })
    }

    pub fn on_commands_change<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Value, &Path) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::CommandsChanged, move |e| {
            if let CoreEvent::CommandsChanged { value, path } = e {
                f(value, path);
            }
        })
    }

    pub fn on_media_status<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::MediaStatus, move |e| {
            if let CoreEvent::MediaStatus(s) = e {
                f(s);
            }
        })
    }

    pub fn on_connect_change<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ConnectChanged, move |e| {
            if let CoreEvent::ConnectChanged(connected) = e {
                f(*connected);
            }
        })
    }

    pub fn on_backend_issue<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::BackendIssue, move |e| {
            if let CoreEvent::BackendIssue(flag) = e {
                f(*flag);
            }
        })
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|p| p.into_inner());
        let total: usize = handlers.values().map(Vec::len).sum();
        f.debug_struct("EventBus").field("handlers", &total).finish()
    }
}
