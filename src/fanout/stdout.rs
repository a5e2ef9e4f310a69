//! Newline-delimited JSON sink.
//!
//! Used by the headless host: every broadcast becomes one
//! `{"channel": "...", "payload": ...}` line on the wrapped writer, which lets
//! a native shell consume the fan-out over a pipe.

use super::{Sink, SinkError};
use serde_json::Value;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sink that writes JSON lines to any [`Write`] implementation.
///
/// The first write error (typically a closed pipe) invalidates the sink.
pub struct JsonLineSink<W: Write + Send> {
    id: String,
    writer: Mutex<W>,
    valid: AtomicBool,
}

impl JsonLineSink<std::io::Stdout> {
    /// Sink writing to the process's stdout.
    pub fn stdout() -> Self {
        Self::new("stdout", std::io::stdout())
    }
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(id: impl Into<String>, writer: W) -> Self {
        Self {
            id: id.into(),
            writer: Mutex::new(writer),
            valid: AtomicBool::new(true),
        }
    }

    /// Consume the sink and return the writer.
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<W: Write + Send> Sink for JsonLineSink<W> {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn deliver(&self, channel: &str, payload: &Value) -> Result<(), SinkError> {
        let line = serde_json::json!({ "channel": channel, "payload": payload }).to_string();
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SinkError::Delivery("writer lock poisoned".into()))?;
        let result = writeln!(writer, "{line}").and_then(|()| writer.flush());
        if let Err(e) = result {
            self.valid.store(false, Ordering::Release);
            return Err(SinkError::Delivery(e.to_string()));
        }
        Ok(())
    }
}
