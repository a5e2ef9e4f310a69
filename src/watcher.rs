//! Debounced file-change detection.
//!
//! [`DebouncedWatcher`] watches the *parent directories* of its target files
//! (non-recursively) so that atomic replace-by-rename is seen the same way as an
//! in-place write. Raw OS notifications are funnelled into a tokio task that
//! keeps one deadline per path and emits a single [`WatchEvent`] once a path has
//! been quiet for the configured period.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Errors from setting up file watching.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to create file watcher: {0}")]
    Init(#[source] notify::Error),

    #[error("failed to watch '{}': {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("path '{}' has no parent directory", path.display())]
    NoParent { path: PathBuf },
}

/// What the path looked like when the quiet period ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Changed,
    Removed,
}

/// One coalesced notification for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

/// Per-path debouncing file watcher.
pub struct DebouncedWatcher {
    watcher: Option<RecommendedWatcher>,
    raw_tx: mpsc::UnboundedSender<PathBuf>,
    cancel: CancellationToken,
    quiet: Duration,
}

impl DebouncedWatcher {
    /// Start the debounce task. No paths are watched until [`watch`](Self::watch).
    ///
    /// Must be called from within a tokio runtime. The returned receiver
    /// yields coalesced events until `cancel` fires or the watcher is dropped.
    pub fn new(
        quiet: Duration,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        tokio::spawn(debounce_loop(raw_rx, out_tx, quiet, cancel.clone()));
        (
            Self {
                watcher: None,
                raw_tx,
                cancel,
                quiet,
            },
            out_rx,
        )
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    /// Begin watching `paths`. Replaces any previous OS watcher.
    ///
    /// Target files do not have to exist yet, but their directories do.
    /// Targets are matched by file name within their directory.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] if the OS watcher cannot be created or a
    /// directory cannot be watched.
    pub fn watch(&mut self, paths: &[PathBuf]) -> Result<(), WatchError> {
        let mut targets: HashMap<OsString, PathBuf> = HashMap::new();
        let mut dirs: HashSet<PathBuf> = HashSet::new();
        for path in paths {
            let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                return Err(WatchError::NoParent { path: path.clone() });
            };
            dirs.insert(dir.to_path_buf());
            targets.insert(name.to_os_string(), path.clone());
        }

        let raw_tx = self.raw_tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => forward_event(&event, &targets, &raw_tx),
                Err(e) => tracing::warn!(error = %e, "file watcher error"),
            },
            Config::default(),
        )
        .map_err(WatchError::Init)?;

        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Watch {
                    path: dir.clone(),
                    source,
                })?;
        }
        tracing::info!(files = paths.len(), dirs = dirs.len(), "watching config files");
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Queue a change for `path` as if the OS had reported one.
    pub fn trigger(&self, path: impl Into<PathBuf>) {
        let _ = self.raw_tx.send(path.into());
    }

    /// Stop watching and cancel pending timers. Idempotent.
    pub fn close(&mut self) {
        self.watcher = None;
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for DebouncedWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn forward_event(
    event: &Event,
    targets: &HashMap<OsString, PathBuf>,
    raw_tx: &mpsc::UnboundedSender<PathBuf>,
) {
    // Our own reads show up as access events on some backends.
    if matches!(event.kind, notify::EventKind::Access(_)) {
        return;
    }
    for path in &event.paths {
        if let Some(target) = path.file_name().and_then(|name| targets.get(name)) {
            let _ = raw_tx.send(target.clone());
        }
    }
}

async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<PathBuf>,
    out_tx: mpsc::UnboundedSender<WatchEvent>,
    quiet: Duration,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    let mut raw_open = true;

    loop {
        let next_due = pending.values().min().copied();
        if !raw_open && next_due.is_none() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(pending = pending.len(), "debounce loop cancelled");
                break;
            }
            raw = raw_rx.recv(), if raw_open => match raw {
                Some(path) => {
                    pending.insert(path, Instant::now() + quiet);
                }
                None => raw_open = false,
            },
            _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    pending.remove(&path);
                    let kind = classify(&path);
                    tracing::debug!(path = %path.display(), ?kind, "debounced change");
                    if out_tx.send(WatchEvent { path, kind }).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn classify(path: &Path) -> WatchEventKind {
    if path.exists() {
        WatchEventKind::Changed
    } else {
        WatchEventKind::Removed
    }
}
