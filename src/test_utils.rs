//! Shared test utilities used across multiple test modules.

use crate::fanout::{Sink, SinkError};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Sink that records every delivered message in memory.
pub struct RecordingSink {
    id: String,
    valid: AtomicBool,
    messages: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            valid: AtomicBool::new(true),
            messages: Mutex::new(Vec::new()),
        })
    }

    /// Mark the sink destroyed.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn messages(&self) -> Vec<(String, Value)> {
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Payloads delivered on one channel, in order.
    pub fn on_channel(&self, channel: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p)
            .collect()
    }
}

impl Sink for RecordingSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn deliver(&self, channel: &str, payload: &Value) -> Result<(), SinkError> {
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((channel.to_owned(), payload.clone()));
        Ok(())
    }
}
