//! The assembled core against a mocked worker that is already running.

use crate::helpers::{RecordingSink, eventually};
use eve::EveCore;
use eve::config::{BridgeConfig, CoreConfig, PollConfig, ReloadConfig, WorkerConfig};
use eve::fanout::SinkRef;
use eve::supervisor::WorkerProcessState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_worker() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/disk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"C:": 55})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/terminal/run"))
        .and(body_json(json!({"input": "help"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": ["ok"]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/reload-commands"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/shutdown"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

fn core_for(server: &MockServer, dir: &std::path::Path, sink: &Arc<RecordingSink>) -> EveCore {
    let config = CoreConfig {
        worker: WorkerConfig {
            port: server.address().port(),
            kill_by_name: false,
            ..WorkerConfig::default()
        },
        bridge: BridgeConfig {
            stream_enabled: false,
            initial_fetch_delay_ms: 0,
            poll: PollConfig {
                media_ms: 0,
                disk_ms: 0,
                recyclebin_ms: 0,
                quote_ms: 0,
            },
            ..BridgeConfig::default()
        },
        reload: ReloadConfig {
            debounce_ms: 100,
            config_dir: Some(dir.join("config")),
        },
    };
    let sinks: Vec<SinkRef> = vec![Arc::clone(sink) as SinkRef];
    EveCore::with_resource_dir(config, Arc::new(move || sinks.clone()), dir.to_path_buf()).unwrap()
}

async fn reload_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/reload-commands")
        .count()
}

/// Wait until at least `at_least` reload requests arrived; returns the count.
async fn wait_for_reloads(server: &MockServer, at_least: usize) -> usize {
    for _ in 0..100 {
        let count = reload_requests(server).await;
        if count >= at_least {
            return count;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    reload_requests(server).await
}

#[tokio::test]
async fn core_runs_against_external_worker() {
    let server = mock_worker().await;
    let dir = tempfile::tempdir().unwrap();
    let sink = RecordingSink::new("main");
    let core = core_for(&server, dir.path(), &sink);

    core.start().await.unwrap();

    assert_eq!(core.supervisor().status().state, WorkerProcessState::Healthy);
    assert!(core.supervisor().status().external);
    assert!(!core.backend_issue());
    assert_eq!(sink.count("ui:update"), 1);
    assert!(eventually(Duration::from_secs(5), || sink.count("disk:update") == 1).await);

    let response = core.run_terminal("help").await;
    assert!(response.ok);
    assert_eq!(response.data, Some(json!({"output": ["ok"]})));

    let late = RecordingSink::new("late");
    assert_eq!(core.replay_to(late.as_ref()), 4);

    core.shutdown().await;
    assert_eq!(core.supervisor().status().state, WorkerProcessState::Stopped);
}

#[tokio::test]
async fn valid_commands_edit_notifies_worker() {
    let server = mock_worker().await;
    let dir = tempfile::tempdir().unwrap();
    let sink = RecordingSink::new("main");
    let core = core_for(&server, dir.path(), &sink);
    core.start().await.unwrap();

    let initial = wait_for_reloads(&server, 1).await;
    assert!(initial >= 1, "initial load should notify the worker");

    let commands_path = core.engine().path_for(eve::reload::DocumentName::Commands);
    std::fs::write(&commands_path, r#"{"commands":[{"id":"x"}]}"#).unwrap();
    assert!(eventually(Duration::from_secs(5), || sink.count("commands:update") == 2).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(reload_requests(&server).await, initial);

    std::fs::write(
        &commands_path,
        r#"{"commands":[{"id":"x","action":{"type":"key","keys":["a"]}}]}"#,
    )
    .unwrap();
    assert!(eventually(Duration::from_secs(5), || sink.count("commands:update") == 3).await);

    assert!(
        wait_for_reloads(&server, initial + 1).await > initial,
        "worker should be told to reload commands"
    );

    core.shutdown().await;
}
