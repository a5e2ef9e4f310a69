//! Real-time status bridge.
//!
//! Two independent feeds end up on the same fan-out:
//!
//! - a persistent WebSocket connection to the worker's event stream, with
//!   heartbeat and capped exponential reconnect backoff
//! - one polling loop per polled [`StatusTopic`]
//!
//! The last payload of every topic is kept so that a sink created later can
//! be brought up to date with [`StatusBridge::replay_to`].

mod backoff;
mod normalize;
mod poller;
mod stream;
mod topic;

pub use backoff::ReconnectBackoff;
pub use normalize::{MediaUpdate, Normalized, is_media_packet, media_status, normalize_text};
pub use poller::snapshot_payload;
pub use stream::{HELLO_FROM, StreamError};
pub use topic::{StatusTopic, TopicInfo};

use crate::config::{BridgeConfig, WorkerConfig};
use crate::events::{CoreEvent, EventBus};
use crate::fanout::{FanoutBroadcaster, Sink};
use crate::supervisor::ProcessSupervisor;
use crate::worker::WorkerClient;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// State of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// `ws://<host>:<port><stream_path>` for the configured worker.
pub fn stream_url(worker: &WorkerConfig, bridge: &BridgeConfig) -> String {
    format!("ws://{}:{}{}", worker.host, worker.port, bridge.stream_path)
}

#[derive(Default)]
struct TopicSlot {
    last: Option<Value>,
    subscriber_count: usize,
}

/// State shared between the bridge handle and its background tasks.
pub(crate) struct BridgeShared {
    broadcaster: FanoutBroadcaster,
    events: Arc<EventBus>,
    topics: Mutex<HashMap<StatusTopic, TopicSlot>>,
    connection: watch::Sender<ConnectionState>,
}

impl BridgeShared {
    fn topics(&self) -> MutexGuard<'_, HashMap<StatusTopic, TopicSlot>> {
        self.topics.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Retain `payload` as the snapshot of `topic` and broadcast it.
    pub(crate) fn publish(&self, topic: StatusTopic, payload: Value) {
        self.broadcaster.broadcast(&topic.channel(), &payload);
        self.topics().entry(topic).or_default().last = Some(payload);
    }

    pub(crate) fn handle_frame(&self, frame: Normalized) {
        self.publish(StatusTopic::Realtime, frame.realtime);
        if let Some(media) = frame.media {
            self.publish(StatusTopic::Media, media.record);
            self.events.publish(&CoreEvent::MediaStatus(media.status));
        }
    }

    pub(crate) fn set_connection(&self, state: ConnectionState) {
        let previous = self.connection.send_replace(state);
        let was_connected = previous == ConnectionState::Connected;
        let is_connected = state == ConnectionState::Connected;
        if was_connected != is_connected {
            self.events.publish(&CoreEvent::ConnectChanged(is_connected));
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Keeps the UI fed with worker status. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct StatusBridge {
    shared: Arc<BridgeShared>,
    client: WorkerClient,
    config: BridgeConfig,
    stream_url: String,
    supervisor: Option<ProcessSupervisor>,
    run: Arc<Mutex<Option<RunHandle>>>,
}

impl StatusBridge {
    pub fn new(
        config: BridgeConfig,
        client: WorkerClient,
        stream_url: impl Into<String>,
        broadcaster: FanoutBroadcaster,
        events: Arc<EventBus>,
    ) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(BridgeShared {
                broadcaster,
                events,
                topics: Mutex::new(HashMap::new()),
                connection,
            }),
            client,
            config,
            stream_url: stream_url.into(),
            supervisor: None,
            run: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait for this supervisor's worker before starting the feeds.
    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    fn run_handle(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.run_handle().is_some()
    }

    /// Start polling and streaming.
    ///
    /// Waits (bounded) for the worker to accept connections, then spawns the
    /// polling loops, one out-of-band fetch of every polled topic shortly
    /// after, and the streaming connection. Returns `false` if already
    /// running or stopped while waiting.
    pub async fn start(&self) -> bool {
        let cancel = CancellationToken::new();
        {
            let mut run = self.run_handle();
            if run.is_some() {
                return false;
            }
            *run = Some(RunHandle {
                cancel: cancel.clone(),
                tasks: Vec::new(),
            });
        }

        if let Some(supervisor) = &self.supervisor {
            let ready = tokio::select! {
                _ = cancel.cancelled() => return false,
                ready = supervisor.wait_until_ready(self.config.ready_timeout()) => ready,
            };
            if !ready {
                tracing::warn!("worker not ready; starting status bridge anyway");
            }
        }

        let mut tasks = Vec::new();
        for topic in StatusTopic::ALL {
            let interval = topic.poll_interval(&self.config.poll);
            if interval.is_zero() {
                continue;
            }
            tasks.push(tokio::spawn(poller::poll_loop(
                Arc::clone(&self.shared),
                self.client.clone(),
                topic,
                interval,
                cancel.clone(),
            )));
        }

        let initial = self.clone();
        let initial_cancel = cancel.clone();
        let delay = self.config.initial_fetch_delay();
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = initial_cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    initial.refresh_all().await;
                }
            }
        }));

        if self.config.stream_enabled {
            let settings = stream::StreamSettings {
                url: self.stream_url.clone(),
                heartbeat: self.config.heartbeat(),
                connect_timeout: self.config.connect_timeout(),
                backoff: ReconnectBackoff::new(
                    Duration::from_millis(self.config.backoff_initial_ms),
                    self.config.backoff_factor,
                    Duration::from_millis(self.config.backoff_max_ms),
                ),
            };
            tasks.push(tokio::spawn(stream::run_stream(
                Arc::clone(&self.shared),
                settings,
                cancel.clone(),
            )));
        }

        let mut run = self.run_handle();
        match run.as_mut() {
            Some(handle) if !handle.cancel.is_cancelled() => {
                handle.tasks = tasks;
                tracing::info!(stream = %self.stream_url, "status bridge started");
                true
            }
            _ => {
                cancel.cancel();
                false
            }
        }
    }

    /// Stop every loop and close the stream with a normal close frame.
    /// Idempotent.
    pub async fn stop(&self) {
        let Some(handle) = self.run_handle().take() else {
            return;
        };
        handle.cancel.cancel();
        for task in handle.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, task).await.is_err() {
                tracing::warn!("status bridge task did not stop in time; aborting");
                abort.abort();
            }
        }
        tracing::info!("status bridge stopped");
    }

    /// Fetch every polled topic once, concurrently. Returns the number of
    /// topics that were refreshed.
    pub async fn refresh_all(&self) -> usize {
        let fetches = StatusTopic::ALL
            .into_iter()
            .filter(|topic| topic.endpoint().is_some())
            .map(|topic| poller::fetch_topic(&self.shared, &self.client, topic));
        futures_util::future::join_all(fetches)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count()
    }

    /// Deliver every retained snapshot to `sink`. Returns how many were
    /// delivered.
    pub fn replay_to(&self, sink: &dyn Sink) -> usize {
        let snapshots: Vec<(StatusTopic, Value)> = {
            let mut topics = self.shared.topics();
            StatusTopic::ALL
                .into_iter()
                .filter_map(|topic| {
                    let slot = topics.get_mut(&topic)?;
                    let last = slot.last.clone()?;
                    slot.subscriber_count += 1;
                    Some((topic, last))
                })
                .collect()
        };
        let delivered = snapshots
            .iter()
            .filter(|(topic, payload)| FanoutBroadcaster::deliver_to(sink, &topic.channel(), payload))
            .count();
        tracing::debug!(sink = sink.id(), delivered, "replayed status snapshots");
        delivered
    }

    pub fn snapshot(&self, topic: StatusTopic) -> Option<Value> {
        self.shared.topics().get(&topic).and_then(|s| s.last.clone())
    }

    pub fn topic_info(&self) -> Vec<TopicInfo> {
        let topics = self.shared.topics();
        StatusTopic::ALL
            .into_iter()
            .map(|topic| {
                let slot = topics.get(&topic);
                TopicInfo {
                    topic,
                    poll_interval: topic.poll_interval(&self.config.poll),
                    has_snapshot: slot.is_some_and(|s| s.last.is_some()),
                    subscriber_count: slot.map_or(0, |s| s.subscriber_count),
                }
            })
            .collect()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.connection.borrow()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.subscribe()
    }
}

impl std::fmt::Debug for StatusBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusBridge")
            .field("stream_url", &self.stream_url)
            .field("connection", &self.connection_state())
            .field("running", &self.is_running())
            .finish()
    }
}
