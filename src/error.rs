//! Error types for the eve core.
//!
//! Each subsystem owns a focused error enum; [`EveError`] wraps them for
//! callers that drive the whole core through [`crate::app::EveCore`].

use crate::reload::ReloadError;
use crate::store::StoreError;
use crate::supervisor::SupervisorError;
use crate::watcher::WatchError;
use crate::worker::WorkerError;

/// Top-level error type for the eve core.
#[derive(Debug, thiserror::Error)]
pub enum EveError {
    /// Core settings could not be read or failed validation.
    #[error("config error: {0}")]
    Config(String),

    /// Config document storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// File watcher failure.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Hot-reload engine failure.
    #[error(transparent)]
    Reload(#[from] ReloadError),

    /// Worker process supervision failure.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// Worker request/response failure.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EveError>;
