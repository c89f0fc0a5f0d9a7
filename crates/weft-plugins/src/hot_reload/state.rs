//! Plugin state management
//!
//! Handles state preservation and restoration during hot-reload. A snapshot
//! combines the plugin's persisted storage value with whatever runtime state
//! the host can export. It lives in the [`StateManager`] from capture until a
//! successful restore moves it out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use weft_kernel::host::{ModuleHost, StorageBackend, storage_key};

use crate::native::bounded;

/// State captured for one plugin before a reload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub plugin_id: String,
    pub captured_at: DateTime<Utc>,
    /// Value stored under `plugin-storage:<id>`
    pub storage: Option<Value>,
    /// State exported by the running module
    pub runtime: Option<Value>,
}

impl StateSnapshot {
    pub fn new(plugin_id: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            captured_at: Utc::now(),
            storage: None,
            runtime: None,
        }
    }

    pub fn with_storage(mut self, value: Value) -> Self {
        self.storage = Some(value);
        self
    }

    pub fn with_runtime(mut self, value: Value) -> Self {
        self.runtime = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_none() && self.runtime.is_none()
    }
}

/// State manager for plugin hot-reload
#[derive(Debug, Default)]
pub struct StateManager {
    /// Snapshots awaiting restore, by plugin ID
    snapshots: RwLock<HashMap<String, StateSnapshot>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot, returning the one it replaced.
    pub async fn save_snapshot(&self, snapshot: StateSnapshot) -> Option<StateSnapshot> {
        debug!(plugin_id = %snapshot.plugin_id, "Saving state snapshot");
        self.snapshots
            .write()
            .await
            .insert(snapshot.plugin_id.clone(), snapshot)
    }

    /// Move a snapshot out of the manager.
    pub async fn take_snapshot(&self, plugin_id: &str) -> Option<StateSnapshot> {
        self.snapshots.write().await.remove(plugin_id)
    }

    pub async fn contains(&self, plugin_id: &str) -> bool {
        self.snapshots.read().await.contains_key(plugin_id)
    }

    pub async fn plugin_ids(&self) -> Vec<String> {
        self.snapshots.read().await.keys().cloned().collect()
    }

    pub async fn clear(&self, plugin_id: &str) {
        debug!("Clearing snapshot for plugin: {}", plugin_id);
        self.snapshots.write().await.remove(plugin_id);
    }

    pub async fn clear_all(&self) {
        self.snapshots.write().await.clear();
    }

    /// Capture storage and runtime state for `plugin_id` and keep it until
    /// restore. Each part is best-effort: a failed read is logged and the
    /// part left empty.
    pub async fn capture(
        &self,
        plugin_id: &str,
        storage: &dyn StorageBackend,
        module: &dyn ModuleHost,
        limit: Duration,
    ) -> StateSnapshot {
        let mut snapshot = StateSnapshot::new(plugin_id);

        let key = storage_key(plugin_id);
        match bounded("storage get", limit, storage.get(&key)).await {
            Ok(value) => snapshot.storage = value,
            Err(e) => warn!(plugin_id, error = %e, "Failed to capture plugin storage"),
        }

        match bounded("get_state", limit, module.get_state(plugin_id)).await {
            Ok(value) => snapshot.runtime = value,
            Err(e) => warn!(plugin_id, error = %e, "Failed to capture runtime state"),
        }

        if self.save_snapshot(snapshot.clone()).await.is_some() {
            debug!(plugin_id, "Replaced stale snapshot");
        }
        snapshot
    }

    /// Write the stored snapshot back through its channels and drop it from
    /// the manager. Write failures are logged; the snapshot is consumed either
    /// way and returned to the caller.
    pub async fn restore(
        &self,
        plugin_id: &str,
        storage: &dyn StorageBackend,
        module: &dyn ModuleHost,
        limit: Duration,
    ) -> Option<StateSnapshot> {
        let snapshot = self.take_snapshot(plugin_id).await?;

        if let Some(value) = snapshot.storage.clone() {
            let key = storage_key(plugin_id);
            if let Err(e) = bounded("storage set", limit, storage.set(&key, value)).await {
                warn!(plugin_id, error = %e, "Failed to restore plugin storage");
            }
        }

        if let Some(value) = snapshot.runtime.clone() {
            if let Err(e) = bounded("set_state", limit, module.set_state(plugin_id, value)).await {
                warn!(plugin_id, error = %e, "Failed to restore runtime state");
            }
        }

        info!(plugin_id, "Restored plugin state");
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use weft_kernel::host::{HostError, HostResult, MemoryStorage};

    #[derive(Default)]
    struct RuntimeState {
        state: Mutex<HashMap<String, Value>>,
        fail_get: bool,
    }

    #[async_trait]
    impl ModuleHost for RuntimeState {
        async fn reload(&self, _plugin_id: &str) -> HostResult<()> {
            Ok(())
        }

        async fn invalidate_cache(&self, _plugin_id: &str) -> HostResult<()> {
            Ok(())
        }

        async fn get_state(&self, plugin_id: &str) -> HostResult<Option<Value>> {
            if self.fail_get {
                return Err(HostError::failed("get_state", "module gone"));
            }
            Ok(self.state.lock().get(plugin_id).cloned())
        }

        async fn set_state(&self, plugin_id: &str, state: Value) -> HostResult<()> {
            self.state.lock().insert(plugin_id.to_string(), state);
            Ok(())
        }
    }

    const LIMIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_snapshot_builders() {
        let snapshot = StateSnapshot::new("notes");
        assert!(snapshot.is_empty());

        let snapshot = snapshot.with_storage(json!({"drafts": 2}));
        assert!(!snapshot.is_empty());
        assert_eq!(snapshot.storage, Some(json!({"drafts": 2})));
        assert_eq!(snapshot.runtime, None);
    }

    #[tokio::test]
    async fn test_capture_then_restore_round_trips_and_clears() {
        let manager = StateManager::new();
        let storage = MemoryStorage::new();
        let module = RuntimeState::default();

        storage
            .set(&storage_key("notes"), json!({"drafts": ["a", "b"]}))
            .await
            .unwrap();
        module.set_state("notes", json!({"cursor": 12})).await.unwrap();

        let captured = manager.capture("notes", &storage, &module, LIMIT).await;
        assert!(manager.contains("notes").await);

        // Simulate the reload wiping both channels.
        storage.delete(&storage_key("notes")).await.unwrap();
        module.state.lock().clear();

        let restored = manager.restore("notes", &storage, &module, LIMIT).await.unwrap();
        assert_eq!(restored, captured);
        assert!(!manager.contains("notes").await, "restore consumes the snapshot");
        assert_eq!(
            storage.get(&storage_key("notes")).await.unwrap(),
            Some(json!({"drafts": ["a", "b"]}))
        );
        assert_eq!(module.state.lock().get("notes"), Some(&json!({"cursor": 12})));

        assert!(manager.restore("notes", &storage, &module, LIMIT).await.is_none());
    }

    #[tokio::test]
    async fn test_capture_is_best_effort() {
        let manager = StateManager::new();
        let storage = MemoryStorage::new();
        storage.set(&storage_key("p"), json!(1)).await.unwrap();
        let module = RuntimeState {
            fail_get: true,
            ..Default::default()
        };

        let snapshot = manager.capture("p", &storage, &module, LIMIT).await;
        assert_eq!(snapshot.storage, Some(json!(1)));
        assert_eq!(snapshot.runtime, None);
    }

    #[tokio::test]
    async fn test_new_capture_replaces_old_snapshot() {
        let manager = StateManager::new();
        assert!(manager.save_snapshot(StateSnapshot::new("p").with_runtime(json!(1))).await.is_none());
        let old = manager
            .save_snapshot(StateSnapshot::new("p").with_runtime(json!(2)))
            .await
            .unwrap();
        assert_eq!(old.runtime, Some(json!(1)));
        assert_eq!(manager.plugin_ids().await, vec!["p".to_string()]);

        manager.clear_all().await;
        assert!(manager.take_snapshot("p").await.is_none());
    }
}
