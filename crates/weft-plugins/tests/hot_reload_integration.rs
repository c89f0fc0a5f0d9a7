//! Integration tests for the hot-reload manager
//!
//! Drives the manager through the host doubles in `common::hosts`: change
//! notifications in, reloads, state restores and bus events out.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use common::hosts::{FakeMarketplace, FakeModule, FakeVersions, FakeWatch};
use weft_kernel::bus::MessageBus;
use weft_kernel::config::HotReloadConfig;
use weft_kernel::host::{FileChangeEvent, FileChangeKind, MemoryStorage, StorageBackend, storage_key};
use weft_kernel::plugin::{PluginDescriptor, PluginSource};
use weft_kernel::OperationKind;
use weft_plugins::hot_reload::{EVENT_RELOAD_FAILED, EVENT_RELOADED, EVENT_SOURCE};
use weft_plugins::lifecycle::RollbackOptions;
use weft_plugins::{HotReloadManager, LifecycleVersionManager, ReloadPhase, WatchStatus};

// ============================================================================
// Helper Functions
// ============================================================================

fn enabled_config() -> HotReloadConfig {
    HotReloadConfig::new()
        .with_enabled(true)
        .with_debounce(Duration::from_millis(300))
}

fn dev_plugin(id: &str) -> PluginDescriptor {
    PluginDescriptor::new(id, "1.0.0", PluginSource::Dev).with_path(format!("/work/{id}"))
}

fn modify(path: &str) -> FileChangeEvent {
    FileChangeEvent::new(FileChangeKind::Modify, path)
}

struct Harness {
    module: Arc<FakeModule>,
    watch: Arc<FakeWatch>,
    storage: Arc<MemoryStorage>,
    manager: HotReloadManager,
}

fn harness(config: HotReloadConfig) -> Harness {
    common::init_tracing();
    let module = FakeModule::new();
    let watch = FakeWatch::new();
    let storage = Arc::new(MemoryStorage::new());
    let manager = HotReloadManager::builder(module.clone(), watch.clone())
        .with_config(config)
        .with_storage(storage.clone())
        .build();
    Harness {
        module,
        watch,
        storage,
        manager,
    }
}

// ============================================================================
// Watching and debounce
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_burst_of_changes_reloads_once() {
    let h = harness(enabled_config());
    let status = h.manager.start_watching_plugins(&[dev_plugin("notes")]).await;
    assert_eq!(status, WatchStatus::Started { plugins: 1, paths: 1 });
    assert_eq!(h.watch.started().len(), 1);

    for _ in 0..3 {
        h.watch.touch("/work/notes/src/index.ts");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(h.manager.pending_reloads(), vec!["notes"]);
    assert_eq!(h.manager.plugin_phase("notes"), ReloadPhase::PendingReload);
    assert_eq!(h.module.reloads(), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(h.module.reloads(), 1);
    assert_eq!(h.manager.history().len(), 1);
    assert!(h.manager.history()[0].success);
    assert!(h.manager.pending_reloads().is_empty());
    assert_eq!(h.manager.plugin_phase("notes"), ReloadPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_separate_plugins_debounce_independently() {
    let h = harness(enabled_config());
    h.manager
        .start_watching_plugins(&[dev_plugin("notes"), dev_plugin("tasks")])
        .await;

    assert_eq!(
        h.manager.handle_file_change(&modify("/work/notes/a.ts")).as_deref(),
        Some("notes")
    );
    assert_eq!(
        h.manager.handle_file_change(&modify("/work/tasks/b.ts")).as_deref(),
        Some("tasks")
    );
    assert_eq!(h.manager.pending_reloads(), vec!["notes", "tasks"]);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(h.module.reloads(), 2);
}

#[tokio::test]
async fn test_changes_outside_watched_plugins_are_dropped() {
    let h = harness(enabled_config());
    let marketplace = PluginDescriptor::new("store", "1.0.0", PluginSource::Marketplace)
        .with_path("/opt/store");
    h.manager
        .start_watching_plugins(&[dev_plugin("notes"), marketplace])
        .await;

    assert_eq!(h.manager.watched_plugins(), vec!["notes"]);
    assert_eq!(h.manager.handle_file_change(&modify("/opt/store/index.js")), None);
    assert_eq!(h.manager.handle_file_change(&modify("/elsewhere/readme.md")), None);
    assert_eq!(
        h.manager.handle_file_change(&modify("/work/notes/node_modules/dep/index.js")),
        None
    );
    assert!(h.manager.pending_reloads().is_empty());
}

#[tokio::test]
async fn test_changes_ignored_when_not_watching() {
    let h = harness(enabled_config());
    h.manager.register(dev_plugin("notes"));
    assert_eq!(h.manager.handle_file_change(&modify("/work/notes/a.ts")), None);
}

#[tokio::test(start_paused = true)]
async fn test_auto_reload_off_resolves_without_scheduling() {
    let h = harness(enabled_config().with_auto_reload(false));
    h.manager.start_watching_plugins(&[dev_plugin("notes")]).await;

    assert_eq!(
        h.manager.handle_file_change(&modify("/work/notes/a.ts")).as_deref(),
        Some("notes")
    );
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.module.reloads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_watching_cancels_pending_reloads() {
    let h = harness(enabled_config());
    h.manager.start_watching_plugins(&[dev_plugin("notes")]).await;
    h.manager.handle_file_change(&modify("/work/notes/a.ts"));
    assert_eq!(h.manager.pending_reloads(), vec!["notes"]);

    h.manager.stop_watching().await;
    assert!(!h.manager.is_watching());
    assert!(h.manager.pending_reloads().is_empty());
    assert_eq!(h.manager.plugin_phase("notes"), ReloadPhase::Idle);
    assert_eq!(h.watch.stops(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.module.reloads(), 0);

    // Idempotent.
    h.manager.stop_watching().await;
    assert_eq!(h.watch.stops(), 1);
}

#[tokio::test]
async fn test_disabling_config_stops_watcher() {
    let h = harness(enabled_config());
    h.manager.start_watching_plugins(&[dev_plugin("notes")]).await;
    assert!(h.manager.is_watching());

    h.manager.set_config(enabled_config().with_enabled(false)).await;
    assert!(!h.manager.is_watching());
    assert_eq!(h.manager.start_watching().await, WatchStatus::Disabled);
}

#[tokio::test]
async fn test_restart_rewatches_current_registrations() {
    let h = harness(enabled_config().with_watch_path("/shared"));
    h.manager.start_watching_plugins(&[dev_plugin("notes")]).await;
    h.manager.register(dev_plugin("tasks"));

    let status = h.manager.start_watching().await;
    assert_eq!(status, WatchStatus::Started { plugins: 2, paths: 3 });
    assert_eq!(h.watch.stops(), 1);
    assert_eq!(h.watch.started().len(), 2);
}

// ============================================================================
// State preservation
// ============================================================================

#[tokio::test]
async fn test_state_restored_and_dropped_after_success() {
    let h = harness(HotReloadConfig::default());
    let key = storage_key("notes");
    h.storage.set(&key, json!({"drafts": ["a"]})).await.unwrap();
    h.module.set_runtime_state("notes", json!({"cursor": 42}));

    let result = h.manager.reload_plugin("notes").await;

    assert!(result.success);
    let snapshot = result.preserved_state.expect("snapshot restored");
    assert_eq!(snapshot.storage, Some(json!({"drafts": ["a"]})));
    assert_eq!(snapshot.runtime, Some(json!({"cursor": 42})));
    assert_eq!(h.module.restored(), vec![("notes".to_string(), json!({"cursor": 42}))]);
    assert_eq!(h.storage.get(&key).await.unwrap(), Some(json!({"drafts": ["a"]})));
    assert!(!h.manager.has_preserved_state("notes").await);
    assert_eq!(h.module.invalidations(), 1);
}

#[tokio::test]
async fn test_failed_reload_keeps_snapshot() {
    let h = harness(HotReloadConfig::default());
    h.module.set_runtime_state("notes", json!({"cursor": 1}));
    h.module.fail_for("notes");

    let failed = h.manager.reload_plugin("notes").await;
    assert!(!failed.success);
    assert!(failed.preserved_state.is_none());
    assert!(failed.error.as_deref().unwrap_or_default().contains("syntax error"));
    assert!(h.manager.has_preserved_state("notes").await);
    assert!(h.module.restored().is_empty());
    assert_eq!(h.manager.plugin_phase("notes"), ReloadPhase::Failed);

    h.module.recover("notes");
    h.module.set_runtime_state("notes", json!({"cursor": 2}));
    let recovered = h.manager.reload_plugin("notes").await;
    assert!(recovered.success);
    assert_eq!(
        recovered.preserved_state.and_then(|s| s.runtime),
        Some(json!({"cursor": 2}))
    );
    assert!(!h.manager.has_preserved_state("notes").await);
}

#[tokio::test]
async fn test_nothing_preserved_when_disabled() {
    let h = harness(HotReloadConfig::default().with_preserve_state(false));
    h.module.set_runtime_state("notes", json!({"cursor": 1}));

    let result = h.manager.reload_plugin("notes").await;
    assert!(result.success);
    assert!(result.preserved_state.is_none());
    assert!(h.module.restored().is_empty());
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_reload_outcomes_published_on_bus() {
    common::init_tracing();
    let module = FakeModule::new();
    let bus = MessageBus::new();
    let manager = HotReloadManager::builder(module.clone(), FakeWatch::new())
        .with_bus(bus.clone())
        .build();

    let seen = Arc::new(Mutex::new(Vec::new()));
    for event_type in [EVENT_RELOADED, EVENT_RELOAD_FAILED] {
        let seen = seen.clone();
        bus.on(event_type, move |event| {
            assert_eq!(event.source.id, EVENT_SOURCE);
            seen.lock().push((
                event.event_type.clone(),
                event.payload["plugin_id"].as_str().unwrap_or_default().to_string(),
            ));
            Ok(())
        });
    }

    manager.reload_plugin("notes").await;
    module.fail_for("tasks");
    manager.reload_plugin("tasks").await;

    assert_eq!(
        *seen.lock(),
        vec![
            (EVENT_RELOADED.to_string(), "notes".to_string()),
            (EVENT_RELOAD_FAILED.to_string(), "tasks".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_reload_all_isolates_failures() {
    let h = harness(enabled_config());
    h.manager
        .start_watching_plugins(&[dev_plugin("a"), dev_plugin("b"), dev_plugin("c")])
        .await;
    h.module.fail_for("b");

    let results = h.manager.reload_all().await;
    let outcomes: Vec<(&str, bool)> = results
        .iter()
        .map(|r| (r.plugin_id.as_str(), r.success))
        .collect();
    assert_eq!(outcomes, vec![("a", true), ("b", false), ("c", true)]);
    assert_eq!(h.module.reloads(), 3);
}

// ============================================================================
// Exclusion with lifecycle operations
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reload_waits_for_rollback_of_same_plugin() {
    common::init_tracing();
    let versions = FakeVersions::new();
    versions.slow(Duration::from_millis(200));
    let lifecycle = LifecycleVersionManager::builder(FakeMarketplace::new(), versions.clone()).build();
    lifecycle.ledger().record_install("notes", "1.0.0");
    lifecycle.ledger().record_install("notes", "2.0.0");

    let module = FakeModule::new();
    let manager = HotReloadManager::builder(module.clone(), FakeWatch::new())
        .with_locks(lifecycle.locks())
        .build();

    let rollback = tokio::spawn({
        let lifecycle = lifecycle.clone();
        async move {
            lifecycle
                .execute_rollback("notes", "1.0.0", RollbackOptions::default())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(lifecycle.locks().in_flight("notes"), Some(OperationKind::Rollback));

    let reload = tokio::spawn({
        let manager = manager.clone();
        async move { manager.reload_plugin("notes").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(module.reloads(), 0, "reload must wait for the rollback");

    let rolled_back = rollback.await.unwrap();
    assert!(rolled_back.success, "{:?}", rolled_back.error);
    let reloaded = reload.await.unwrap();
    assert!(reloaded.success);
    assert_eq!(module.reloads(), 1);
    assert_eq!(lifecycle.locks().in_flight("notes"), None);
}

#[tokio::test]
async fn test_unregister_drops_snapshot_and_watch() {
    let h = harness(enabled_config());
    h.manager.start_watching_plugins(&[dev_plugin("notes")]).await;
    h.module.set_runtime_state("notes", json!(1));
    h.module.fail_for("notes");
    h.manager.reload_plugin("notes").await;
    assert!(h.manager.has_preserved_state("notes").await);

    let removed = h.manager.unregister("notes").await;
    assert_eq!(removed.map(|d| d.id).as_deref(), Some("notes"));
    assert!(!h.manager.has_preserved_state("notes").await);
    assert!(h.manager.watched_plugins().is_empty());
    assert_eq!(h.manager.handle_file_change(&modify("/work/notes/a.ts")), None);
}
