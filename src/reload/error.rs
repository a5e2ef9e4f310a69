use crate::store::StoreError;

/// Errors from the config hot-reload engine.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("config reload engine is already initialized")]
    AlreadyInitialized,

    #[error("invalid commands document: {reason}")]
    InvalidCommands { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
