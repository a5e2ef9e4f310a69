//! Status bridge against a mocked worker and a local event stream.

use crate::helpers::{RecordingSink, StreamServer, broadcaster_for, eventually};
use eve::bridge::{ConnectionState, HELLO_FROM, StatusBridge, StatusTopic};
use eve::config::{BridgeConfig, PollConfig};
use eve::events::EventBus;
use eve::worker::WorkerClient;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SETTLE: Duration = Duration::from_secs(5);

fn quiet_polls() -> PollConfig {
    PollConfig {
        media_ms: 0,
        disk_ms: 0,
        recyclebin_ms: 0,
        quote_ms: 0,
    }
}

fn client_for(base_url: &str) -> WorkerClient {
    WorkerClient::new(base_url, Duration::from_millis(500), Duration::from_millis(500)).unwrap()
}

async fn mount_get(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn worker_with_status_endpoints() -> MockServer {
    let server = MockServer::start().await;
    mount_get(&server, "/disk", json!({"C:": {"used": 40, "total": 100}})).await;
    mount_get(&server, "/recyclebin", json!({"bytes": 1024})).await;
    mount_get(&server, "/dailyquote", json!({"quote": "Stay curious."})).await;
    mount_get(&server, "/media", json!([{"title": "Song", "status": "playing"}])).await;
    server
}

fn polling_bridge(server: &MockServer, sink: &Arc<RecordingSink>, poll: PollConfig) -> StatusBridge {
    let config = BridgeConfig {
        stream_enabled: false,
        initial_fetch_delay_ms: 0,
        poll,
        ..BridgeConfig::default()
    };
    StatusBridge::new(
        config,
        client_for(&server.uri()),
        "ws://127.0.0.1:1/ws",
        broadcaster_for(std::slice::from_ref(sink)),
        Arc::new(EventBus::new()),
    )
}

fn streaming_bridge(stream: &StreamServer, sink: &Arc<RecordingSink>, events: Arc<EventBus>) -> StatusBridge {
    streaming_bridge_with(stream, sink, events, BridgeConfig::default().heartbeat_secs)
}

fn streaming_bridge_with(
    stream: &StreamServer,
    sink: &Arc<RecordingSink>,
    events: Arc<EventBus>,
    heartbeat_secs: u64,
) -> StatusBridge {
    let config = BridgeConfig {
        heartbeat_secs,
        stream_enabled: true,
        backoff_initial_ms: 50,
        backoff_max_ms: 200,
        initial_fetch_delay_ms: 60_000,
        poll: quiet_polls(),
        ..BridgeConfig::default()
    };
    StatusBridge::new(
        config,
        client_for(&format!("http://127.0.0.1:{}", stream.port())),
        stream.url("/ws"),
        broadcaster_for(std::slice::from_ref(sink)),
        events,
    )
}

fn hellos(stream: &StreamServer) -> usize {
    stream
        .received()
        .iter()
        .filter_map(|text| serde_json::from_str::<Value>(text).ok())
        .filter(|v| v == &json!({"type": "hello", "from": HELLO_FROM}))
        .count()
}

#[tokio::test]
async fn refresh_all_publishes_every_polled_topic() {
    let server = worker_with_status_endpoints().await;
    let sink = RecordingSink::new("main");
    let bridge = polling_bridge(&server, &sink, quiet_polls());

    assert_eq!(bridge.refresh_all().await, 4);

    assert_eq!(sink.on_channel("disk:update")[0]["C:"]["used"], 40);
    assert_eq!(sink.on_channel("recyclebin:update")[0]["bytes"], 1024);
    assert_eq!(sink.on_channel("quote:update")[0]["quote"], "Stay curious.");
    assert_eq!(
        sink.on_channel("media:update")[0],
        json!({"type": "media:snapshot", "list": [{"title": "Song", "status": "playing"}]})
    );
    assert_eq!(sink.count("realtime:update"), 0);
}

#[tokio::test]
async fn failing_endpoint_keeps_last_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/disk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"C:": 1})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/disk"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let sink = RecordingSink::new("main");
    let bridge = polling_bridge(&server, &sink, quiet_polls());

    assert_eq!(bridge.refresh_all().await, 1);
    assert_eq!(bridge.refresh_all().await, 0);

    assert_eq!(sink.count("disk:update"), 1);
    assert_eq!(bridge.snapshot(StatusTopic::Disk), Some(json!({"C:": 1})));
}

#[tokio::test]
async fn polling_loop_repeats_on_interval() {
    let server = worker_with_status_endpoints().await;
    let sink = RecordingSink::new("main");
    let bridge = polling_bridge(
        &server,
        &sink,
        PollConfig {
            disk_ms: 50,
            ..quiet_polls()
        },
    );

    assert!(bridge.start().await);
    assert!(eventually(SETTLE, || sink.count("disk:update") >= 3).await);
    bridge.stop().await;

    let after_stop = sink.count("disk:update");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.count("disk:update"), after_stop);
    assert_eq!(sink.count("quote:update"), 1);
}

#[tokio::test]
async fn late_sink_replays_filled_topics_only() {
    let server = MockServer::start().await;
    mount_get(&server, "/disk", json!({"C:": 9})).await;
    let sink = RecordingSink::new("main");
    let bridge = polling_bridge(&server, &sink, quiet_polls());
    bridge.refresh_all().await;

    let late = RecordingSink::new("late");
    assert_eq!(bridge.replay_to(late.as_ref()), 1);
    assert_eq!(late.on_channel("disk:update"), vec![json!({"C:": 9})]);
    assert_eq!(late.count("media:update"), 0);
}

#[tokio::test]
async fn stream_says_hello_and_forwards_frames() {
    let stream = StreamServer::start().await;
    let sink = RecordingSink::new("main");
    let events = Arc::new(EventBus::new());
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&statuses);
    events.on_media_status(move |status| s.lock().unwrap().push(status.to_owned()));
    let bridge = streaming_bridge(&stream, &sink, events);

    assert!(bridge.start().await);
    assert!(eventually(SETTLE, || hellos(&stream) == 1).await);
    assert_eq!(bridge.connection_state(), ConnectionState::Connected);

    stream.send(r#"{"type":"cpu","value":12}"#);
    stream.send(r#"{"type":"media","status":"paused","title":"Song"}"#);
    stream.send("not json");

    assert!(eventually(SETTLE, || sink.count("realtime:update") == 3).await);
    let realtime = sink.on_channel("realtime:update");
    assert_eq!(realtime[0]["value"], 12);
    assert_eq!(realtime[2], json!({"type": "raw", "data": "not json"}));
    assert_eq!(sink.on_channel("media:update")[0]["title"], "Song");
    assert_eq!(*statuses.lock().unwrap(), vec!["paused".to_owned()]);

    bridge.stop().await;
    assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn stream_reconnects_after_server_close() {
    let stream = StreamServer::start().await;
    let sink = RecordingSink::new("main");
    let events = Arc::new(EventBus::new());
    let edges = Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&edges);
    events.on_connect_change(move |up| e.lock().unwrap().push(up));
    let bridge = streaming_bridge(&stream, &sink, events);

    bridge.start().await;
    assert!(eventually(SETTLE, || hellos(&stream) == 1).await);

    stream.close_all();
    assert!(eventually(SETTLE, || stream.connections() == 2 && hellos(&stream) == 2).await);
    assert!(eventually(SETTLE, || bridge.connection_state() == ConnectionState::Connected).await);

    bridge.stop().await;
    assert_eq!(*edges.lock().unwrap(), vec![true, false, true, false]);
}

#[tokio::test]
async fn unreachable_stream_keeps_retrying_until_stopped() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let sink = RecordingSink::new("main");
    let config = BridgeConfig {
        backoff_initial_ms: 20,
        backoff_max_ms: 40,
        poll: quiet_polls(),
        initial_fetch_delay_ms: 60_000,
        ..BridgeConfig::default()
    };
    let bridge = StatusBridge::new(
        config,
        client_for(&format!("http://127.0.0.1:{port}")),
        format!("ws://127.0.0.1:{port}/ws"),
        broadcaster_for(std::slice::from_ref(&sink)),
        Arc::new(EventBus::new()),
    );

    bridge.start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_ne!(bridge.connection_state(), ConnectionState::Connected);

    tokio::time::timeout(Duration::from_secs(3), bridge.stop())
        .await
        .expect("stop should not hang");
    assert!(!bridge.is_running());
}

#[tokio::test]
async fn missing_pong_drops_connection_and_reconnects() {
    let stream = StreamServer::start_with_silent_first().await;
    let sink = RecordingSink::new("main");
    let events = Arc::new(EventBus::new());
    let edges = Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&edges);
    events.on_connect_change(move |up| e.lock().unwrap().push(up));
    let bridge = streaming_bridge_with(&stream, &sink, events, 1);

    bridge.start().await;
    assert!(eventually(SETTLE, || stream.connections() == 1).await);
    assert!(eventually(SETTLE, || stream.connections() == 2 && hellos(&stream) == 1).await);
    assert!(eventually(SETTLE, || bridge.connection_state() == ConnectionState::Connected).await);

    assert_eq!(edges.lock().unwrap()[..2], [true, false]);

    tokio::time::timeout(Duration::from_secs(3), bridge.stop())
        .await
        .expect("stop should not hang");
    assert!(!bridge.is_running());
}

#[tokio::test]
async fn stop_is_bounded_with_unresponsive_peer() {
    let stream = StreamServer::start_with_silent_first().await;
    let sink = RecordingSink::new("main");
    let bridge = streaming_bridge(&stream, &sink, Arc::new(EventBus::new()));

    bridge.start().await;
    assert!(eventually(SETTLE, || bridge.connection_state() == ConnectionState::Connected).await);

    tokio::time::timeout(Duration::from_secs(3), bridge.stop())
        .await
        .expect("stop should not hang");
    assert!(!bridge.is_running());
    assert_eq!(bridge.connection_state(), ConnectionState::Disconnected);
}
