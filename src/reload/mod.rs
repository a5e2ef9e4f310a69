//! Config hot-reload.
//!
//! The engine seeds missing documents from built-in defaults, loads them once
//! at startup, then reloads each one after its file has been quiet for the
//! debounce period. Reloads go out on `<name>:update` with startup-only fields
//! removed, see [`FieldPolicy`].

mod defaults;
mod document;
mod engine;
mod error;
mod policy;

pub use defaults::default_document;
pub use document::{ConfigDocument, DocumentName};
pub use engine::{
    CommandsCallback, ConfigCallback, ConfigCallbacks, ConfigHotReloadEngine, validate_commands,
};
pub use error::ReloadError;
pub use policy::FieldPolicy;
