//! Supervisor scenarios against real ports.

use eve::config::WorkerConfig;
use eve::events::EventBus;
use eve::supervisor::{ProcessSupervisor, StopOutcome, WorkerProcessState};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for_port(port: u16) -> WorkerConfig {
    WorkerConfig {
        port,
        image_name: "eve-integration-missing-worker".into(),
        kill_by_name: false,
        restart_settle_ms: 20,
        shutdown_request_timeout_ms: 300,
        ..WorkerConfig::default()
    }
}

fn supervisor_for(config: WorkerConfig, dir: &std::path::Path, events: Arc<EventBus>) -> ProcessSupervisor {
    ProcessSupervisor::new(config, dir.join("config"), dir.to_path_buf(), events).unwrap()
}

async fn mock_worker() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/shutdown"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn listening_port_is_adopted_as_external_worker() {
    let server = mock_worker().await;
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_for(config_for_port(server.address().port()), dir.path(), Arc::new(EventBus::new()));

    assert!(sup.port_in_use().await);
    assert_eq!(sup.start().await, WorkerProcessState::Healthy);

    let status = sup.status();
    assert!(status.external);
    assert!(!status.backend_issue);
    assert_eq!(status.launch_count, 0);
    assert!(sup.wait_until_ready(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn stubborn_worker_is_force_killed_after_shutdown_request() {
    let server = mock_worker().await;
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_for(config_for_port(server.address().port()), dir.path(), Arc::new(EventBus::new()));
    sup.start().await;

    let outcome = sup
        .graceful_stop(Duration::from_millis(300), Duration::from_millis(50), true)
        .await;

    assert_eq!(outcome, StopOutcome::ForceKilled);
    assert_eq!(sup.status().state, WorkerProcessState::Stopped);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.iter().filter(|r| r.url.path() == "/shutdown").count(), 1);
}

#[tokio::test]
async fn stop_without_fallback_times_out() {
    let server = mock_worker().await;
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_for(config_for_port(server.address().port()), dir.path(), Arc::new(EventBus::new()));
    sup.start().await;

    let outcome = sup
        .graceful_stop(Duration::from_millis(200), Duration::from_millis(50), false)
        .await;

    assert_eq!(outcome, StopOutcome::TimedOut);
    assert_eq!(sup.status().state, WorkerProcessState::Stopped);
}

#[tokio::test]
async fn stop_with_free_port_reports_not_running() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_for(config_for_port(port), dir.path(), Arc::new(EventBus::new()));

    assert_eq!(sup.stop().await, StopOutcome::NotRunning);
    assert_eq!(sup.status().state, WorkerProcessState::Stopped);
}

#[tokio::test]
async fn missing_binary_raises_backend_issue_once() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(EventBus::new());
    let flags = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::clone(&flags);
    events.on_backend_issue(move |issue| f.lock().unwrap().push(issue));
    let sup = supervisor_for(config_for_port(port), dir.path(), events);

    assert_eq!(sup.start().await, WorkerProcessState::Unhealthy);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(sup.backend_issue());
    assert_eq!(sup.status().restart_count, 0);
    assert_eq!(*flags.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn concurrent_restarts_collapse() {
    let server = mock_worker().await;
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor_for(config_for_port(server.address().port()), dir.path(), Arc::new(EventBus::new()));
    sup.start().await;

    let (first, second) = tokio::join!(sup.restart(), sup.restart());

    assert!(first ^ second, "exactly one restart should run");
    let status = sup.status();
    assert_eq!(status.state, WorkerProcessState::Healthy);
    assert!(status.external);
    assert!(!status.backend_issue);
}
