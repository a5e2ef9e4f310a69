//! Centralized application directory paths for Eve.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Directory Layout
//!
//! | Purpose | Windows | Linux |
//! |---------|---------|-------|
//! | App data | `%APPDATA%\eve\` | `~/.local/share/eve/` |
//! | Config documents | `%APPDATA%\eve\config\` | `~/.config/eve/` |
//! | Logs | `%APPDATA%\eve\logs\` | `~/.local/share/eve/logs/` |
//!
//! # Environment Overrides
//!
//! - `EVE_DATA_DIR`: overrides [`data_dir`]
//! - `EVE_CONFIG_DIR`: overrides [`config_dir`]
//! - `EVE_RESOURCE_DIR`: overrides [`resource_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Resolves to `dirs::data_dir()/eve/` by default. Override with
/// the `EVE_DATA_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("EVE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("eve"))
        .unwrap_or_else(|| PathBuf::from("/tmp/eve-data"))
}

/// Config document directory (`theme.json`, `ui.json`, `commands.json`, `eve.toml`).
///
/// Resolves to `dirs::config_dir()/eve/` by default. Override with
/// the `EVE_CONFIG_DIR` environment variable. The same path is handed to the
/// worker process through its environment so both sides read one directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("EVE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("eve"))
        .unwrap_or_else(|| PathBuf::from("/tmp/eve-config"))
}

/// Packaged resource directory holding `bin/<worker image>`.
///
/// Defaults to the directory containing the running executable.
#[must_use]
pub fn resource_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("EVE_RESOURCE_DIR") {
        return PathBuf::from(override_dir);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Core settings file path (`config_dir()/eve.toml`).
#[must_use]
pub fn settings_file() -> PathBuf {
    config_dir().join("eve.toml")
}
