use crate::worker::WorkerError;
use std::path::PathBuf;

/// Errors from worker process supervision.
///
/// Launch failures are reported through the worker status (backend issue)
/// rather than returned; these values end up in logs.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("worker executable '{image}' not found (searched: {searched})")]
    NotFound { image: String, searched: String },

    #[error("failed to spawn worker '{}': {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Client(#[from] WorkerError),
}
