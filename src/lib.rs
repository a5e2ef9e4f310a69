//! Eve: process supervision, config hot-reload and status fan-out core for
//! the Eve desktop companion.
//!
//! The core sits between a native UI shell and a local worker process:
//!
//! - **Supervisor**: spawns the worker, tracks its health, restarts it a
//!   bounded number of times and stops it gracefully
//! - **Config hot-reload**: seeds, loads and watches `theme.json`, `ui.json`
//!   and `commands.json`, pushing debounced changes to every window
//! - **Status bridge**: streams worker events over WebSocket and polls its
//!   status endpoints, keeping the last snapshot of each topic for replay
//!
//! All three deliver to the UI through one [`fanout::FanoutBroadcaster`] and
//! report state changes on one [`events::EventBus`]. [`app::EveCore`] wires
//! them together.

pub mod app;
pub mod bridge;
pub mod config;
pub mod error;
pub mod eve_dirs;
pub mod events;
pub mod fanout;
pub mod reload;
pub mod store;
pub mod supervisor;
pub mod watcher;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use app::EveCore;
pub use config::CoreConfig;
pub use error::{EveError, Result};
pub use events::{CoreEvent, EventBus, EventKind};
pub use fanout::{Channel, FanoutBroadcaster, Sink, SinkError, SinkRef};
