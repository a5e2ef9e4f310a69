//! Config hot-reload against a real directory and real file edits.

use crate::helpers::{RecordingSink, broadcaster_for, eventually};
use eve::events::EventBus;
use eve::reload::{ConfigCallbacks, ConfigHotReloadEngine, DocumentName, default_document};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(150);
const SETTLE: Duration = Duration::from_secs(5);

async fn engine_in(dir: &std::path::Path, sink: &Arc<RecordingSink>) -> ConfigHotReloadEngine {
    let engine = ConfigHotReloadEngine::new(dir, DEBOUNCE, Arc::new(EventBus::new()));
    engine
        .initialize(broadcaster_for(std::slice::from_ref(sink)), ConfigCallbacks::new())
        .await
        .unwrap();
    engine
}

fn write_json(path: &std::path::Path, value: &serde_json::Value) {
    std::fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

#[tokio::test]
async fn seeds_missing_documents_once() {
    let dir = tempfile::tempdir().unwrap();
    let sink = RecordingSink::new("main");
    let engine = engine_in(dir.path(), &sink).await;

    for name in DocumentName::ALL {
        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(engine.path_for(name)).unwrap()).unwrap();
        assert_eq!(on_disk, default_document(name));
    }
    engine.destroy();

    let edited = json!({"version": 7, "theme": {"fontFamily": "Inter"}});
    write_json(&engine.path_for(DocumentName::Theme), &edited);

    let second = RecordingSink::new("second");
    let engine = engine_in(dir.path(), &second).await;
    assert_eq!(engine.full(DocumentName::Theme), Some(edited.clone()));
    assert_eq!(second.on_channel("theme:update"), vec![edited]);
    assert!(!dir.path().join("theme.json.tmp").exists());
    engine.destroy();
}

#[tokio::test]
async fn ui_edit_broadcasts_hot_change_without_startup_only_field() {
    let dir = tempfile::tempdir().unwrap();
    let sink = RecordingSink::new("main");
    let engine = engine_in(dir.path(), &sink).await;
    assert_eq!(sink.count("ui:update"), 1);

    let edited = json!({
        "ui": {
            "scale": 1.25,
            "alwaysOnTop": true,
            "mediaWindow": { "visibilityMode": "auto" },
            "default_immersive_mode": "on"
        }
    });
    write_json(&engine.path_for(DocumentName::Ui), &edited);

    assert!(eventually(SETTLE, || sink.count("ui:update") >= 2).await);
    tokio::time::sleep(DEBOUNCE * 3).await;

    let updates = sink.on_channel("ui:update");
    assert_eq!(updates.len(), 2, "one reload expected: {updates:?}");
    assert_eq!(updates[1]["ui"]["scale"], 1.25);
    assert!(updates[1]["ui"].get("default_immersive_mode").is_none());
    assert_eq!(
        engine.full(DocumentName::Ui).unwrap()["ui"]["default_immersive_mode"],
        "on"
    );
    engine.destroy();
}

#[tokio::test]
async fn burst_of_writes_reloads_once_with_last_content() {
    let dir = tempfile::tempdir().unwrap();
    let sink = RecordingSink::new("main");
    let engine = engine_in(dir.path(), &sink).await;
    let path = engine.path_for(DocumentName::Theme);

    for size in 10..15 {
        write_json(&path, &json!({"theme": {"baseFontSizePx": size}}));
    }

    assert!(eventually(SETTLE, || sink.count("theme:update") >= 2).await);
    tokio::time::sleep(DEBOUNCE * 3).await;

    let updates = sink.on_channel("theme:update");
    assert_eq!(updates.len(), 2, "burst should collapse: {updates:?}");
    assert_eq!(updates[1]["theme"]["baseFontSizePx"], 14);
    engine.destroy();
}

#[tokio::test]
async fn malformed_edit_keeps_previous_value() {
    let dir = tempfile::tempdir().unwrap();
    let sink = RecordingSink::new("main");
    let engine = engine_in(dir.path(), &sink).await;
    let before = engine.full(DocumentName::Commands);

    std::fs::write(engine.path_for(DocumentName::Commands), "{ not json").unwrap();
    tokio::time::sleep(DEBOUNCE * 4).await;

    assert_eq!(sink.count("commands:update"), 1);
    assert_eq!(engine.full(DocumentName::Commands), before);

    let fixed = json!({"commands": [{"id": "a", "action": {"type": "key"}}]});
    write_json(&engine.path_for(DocumentName::Commands), &fixed);
    assert!(eventually(SETTLE, || sink.count("commands:update") == 2).await);
    assert_eq!(engine.full(DocumentName::Commands), Some(fixed));
    engine.destroy();
}

#[tokio::test]
async fn commands_callback_receives_backing_path() {
    let dir = tempfile::tempdir().unwrap();
    let sink = RecordingSink::new("main");
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let expected = dir.path().join("commands.json");

    let engine = ConfigHotReloadEngine::new(dir.path(), DEBOUNCE, Arc::new(EventBus::new()));
    engine
        .initialize(
            broadcaster_for(std::slice::from_ref(&sink)),
            ConfigCallbacks::new().on_commands_change(move |_, path| {
                assert_eq!(path, expected.as_path());
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    write_json(
        &engine.path_for(DocumentName::Commands),
        &json!({"commands": []}),
    );
    assert!(eventually(SETTLE, || calls.load(Ordering::SeqCst) == 2).await);
    engine.destroy();
}

#[tokio::test]
async fn destroyed_engine_ignores_edits_and_dead_sinks_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let live = RecordingSink::new("live");
    let dead = RecordingSink::new("dead");
    dead.invalidate();

    let engine = ConfigHotReloadEngine::new(dir.path(), DEBOUNCE, Arc::new(EventBus::new()));
    engine
        .initialize(broadcaster_for(&[Arc::clone(&dead), Arc::clone(&live)]), ConfigCallbacks::new())
        .await
        .unwrap();
    assert_eq!(live.count("theme:update"), 1);
    assert_eq!(dead.count("theme:update"), 0);

    engine.destroy();
    write_json(&engine.path_for(DocumentName::Theme), &json!({"theme": {}}));
    tokio::time::sleep(DEBOUNCE * 4).await;

    assert_eq!(live.count("theme:update"), 1);
}
