//! Periodic polling of the worker's status endpoints.
//!
//! Each tick is an independent attempt: a failed fetch is logged at debug
//! level and the loop simply waits for the next tick.

use super::{BridgeShared, StatusTopic};
use crate::worker::WorkerClient;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Wrap a raw endpoint reply in the payload shape broadcast for `topic`.
pub fn snapshot_payload(topic: StatusTopic, value: Value) -> Value {
    match topic {
        StatusTopic::Media => json!({ "type": "media:snapshot", "list": value }),
        _ => value,
    }
}

/// Fetch `topic` once and publish the result. Returns whether it succeeded.
pub(crate) async fn fetch_topic(shared: &BridgeShared, client: &WorkerClient, topic: StatusTopic) -> bool {
    let Some(path) = topic.endpoint() else {
        return false;
    };
    match client.get_json(path).await {
        Ok(value) => {
            shared.publish(topic, snapshot_payload(topic, value));
            true
        }
        Err(e) => {
            tracing::debug!(topic = %topic, error = %e, "status poll failed");
            false
        }
    }
}

pub(crate) async fn poll_loop(
    shared: Arc<BridgeShared>,
    client: WorkerClient,
    topic: StatusTopic,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; the initial fetch is scheduled separately.
    ticker.tick().await;

    tracing::debug!(topic = %topic, interval_ms = interval.as_millis() as u64, "status poller started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = fetch_topic(&shared, &client, topic) => {}
                }
            }
        }
    }
    tracing::debug!(topic = %topic, "status poller stopped");
}
