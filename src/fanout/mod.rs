//! Fan-out of named events to a live, changing set of UI sinks.
//!
//! The broadcaster never caches sinks: every call asks the caller-supplied
//! [`SinkEnumerator`] for the current list, because windows can be destroyed
//! at any moment. A failing sink is logged and skipped; the remaining sinks
//! still receive the message.

mod channel;
mod stdout;

pub use channel::Channel;
pub use stdout::JsonLineSink;

use serde_json::Value;
use std::sync::Arc;

/// Errors a sink may report on delivery.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink was destroyed between enumeration and delivery.
    #[error("sink destroyed")]
    Destroyed,

    /// The sink accepted the call but could not deliver the message.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// A UI surface capable of receiving `(channel, payload)` messages.
pub trait Sink: Send + Sync {
    /// Stable identifier used in logs.
    fn id(&self) -> &str;

    /// Whether the sink can still receive messages.
    fn is_valid(&self) -> bool;

    /// Deliver one message.
    fn deliver(&self, channel: &str, payload: &Value) -> Result<(), SinkError>;
}

/// Shared handle to a sink.
pub type SinkRef = Arc<dyn Sink>;

/// Returns the sinks that exist right now. Queried on every broadcast.
pub type SinkEnumerator = Arc<dyn Fn() -> Vec<SinkRef> + Send + Sync>;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sinks that accepted the message.
    pub delivered: usize,
    /// Sinks skipped because they reported themselves invalid.
    pub skipped: usize,
    /// Sinks whose delivery returned an error.
    pub failed: usize,
}

/// Delivers channel messages to every currently valid sink.
#[derive(Clone)]
pub struct FanoutBroadcaster {
    sinks: SinkEnumerator,
}

impl FanoutBroadcaster {
    pub fn new(sinks: SinkEnumerator) -> Self {
        Self { sinks }
    }

    /// Broadcaster over a fixed enumerator closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> Vec<SinkRef> + Send + Sync + 'static,
    {
        Self::new(Arc::new(f))
    }

    /// Broadcaster with no sinks, for headless use.
    pub fn empty() -> Self {
        Self::from_fn(Vec::new)
    }

    /// Number of sinks the enumerator currently returns (valid or not).
    pub fn sink_count(&self) -> usize {
        (self.sinks)().len()
    }

    /// Send `payload` on `channel` to every valid sink.
    pub fn broadcast(&self, channel: &Channel, payload: &Value) -> DeliveryReport {
        let name = channel.to_string();
        let mut report = DeliveryReport::default();
        for sink in (self.sinks)() {
            if !sink.is_valid() {
                report.skipped += 1;
                continue;
            }
            match sink.deliver(&name, payload) {
                Ok(()) => report.delivered += 1,
                Err(SinkError::Destroyed) => {
                    tracing::debug!(sink = sink.id(), channel = %name, "sink destroyed during delivery");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(sink = sink.id(), channel = %name, error = %e, "broadcast delivery failed");
                    report.failed += 1;
                }
            }
        }
        tracing::trace!(
            channel = %name,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "broadcast"
        );
        report
    }

    /// Send one message to a single sink. Returns `true` if delivered.
    pub fn deliver_to(sink: &dyn Sink, channel: &Channel, payload: &Value) -> bool {
        if !sink.is_valid() {
            return false;
        }
        match sink.deliver(&channel.to_string(), payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(sink = sink.id(), channel = %channel, error = %e, "direct delivery failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for FanoutBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutBroadcaster").finish_non_exhaustive()
    }
}
