//! Plugin data backups
//!
//! A backup copies the plugin's persisted storage value at a point in time so
//! an update or rollback can be undone at the data level.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use weft_kernel::host::{StorageBackend, storage_key};

use super::error::{LifecycleError, LifecycleResult};
use crate::native::bounded;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupReason {
    PreUpdate,
    PreRollback,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginBackup {
    pub id: String,
    pub plugin_id: String,
    /// Version installed when the backup was taken
    pub version: String,
    pub reason: BackupReason,
    pub created_at: DateTime<Utc>,
    /// Storage value at backup time; `None` when nothing was stored
    pub data: Option<Value>,
}

pub struct BackupManager {
    storage: Arc<dyn StorageBackend>,
    native_timeout: Duration,
    /// Per plugin, oldest first
    backups: RwLock<HashMap<String, Vec<PluginBackup>>>,
}

impl BackupManager {
    pub fn new(storage: Arc<dyn StorageBackend>, native_timeout: Duration) -> Self {
        Self {
            storage,
            native_timeout,
            backups: RwLock::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Copy the plugin's storage value into a new backup.
    pub async fn create_backup(
        &self,
        plugin_id: &str,
        version: &str,
        reason: BackupReason,
    ) -> LifecycleResult<PluginBackup> {
        let key = storage_key(plugin_id);
        let data = bounded("storage.get", self.native_timeout, self.storage.get(&key)).await?;

        let backup = PluginBackup {
            id: Uuid::now_v7().to_string(),
            plugin_id: plugin_id.to_string(),
            version: version.to_string(),
            reason,
            created_at: Utc::now(),
            data,
        };

        self.backups
            .write()
            .entry(plugin_id.to_string())
            .or_default()
            .push(backup.clone());

        info!(plugin_id, version, backup_id = %backup.id, ?reason, "Created plugin backup");
        Ok(backup)
    }

    /// Backups of one plugin, newest first.
    pub fn list_backups(&self, plugin_id: &str) -> Vec<PluginBackup> {
        self.backups
            .read()
            .get(plugin_id)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_backup(&self, backup_id: &str) -> Option<PluginBackup> {
        self.backups
            .read()
            .values()
            .flatten()
            .find(|b| b.id == backup_id)
            .cloned()
    }

    /// Write a backup's data back to storage.
    ///
    /// A backup taken while nothing was stored clears the key.
    pub async fn restore_backup(&self, backup_id: &str) -> LifecycleResult<PluginBackup> {
        let backup = self
            .get_backup(backup_id)
            .ok_or_else(|| LifecycleError::BackupNotFound(backup_id.to_string()))?;

        let key = storage_key(&backup.plugin_id);
        match &backup.data {
            Some(data) => {
                bounded(
                    "storage.set",
                    self.native_timeout,
                    self.storage.set(&key, data.clone()),
                )
                .await?
            }
            None => bounded("storage.delete", self.native_timeout, self.storage.delete(&key)).await?,
        }

        info!(plugin_id = %backup.plugin_id, backup_id, "Restored plugin backup");
        Ok(backup)
    }

    pub fn delete_backup(&self, backup_id: &str) -> bool {
        let mut backups = self.backups.write();
        for list in backups.values_mut() {
            if let Some(pos) = list.iter().position(|b| b.id == backup_id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Keep only the newest `keep` backups of a plugin. Returns how many were dropped.
    pub fn prune(&self, plugin_id: &str, keep: usize) -> usize {
        let mut backups = self.backups.write();
        let Some(list) = backups.get_mut(plugin_id) else {
            return 0;
        };
        let excess = list.len().saturating_sub(keep);
        list.drain(..excess);
        if excess > 0 {
            debug!(plugin_id, dropped = excess, "Pruned plugin backups");
        }
        excess
    }
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backups = self.backups.read();
        f.debug_struct("BackupManager")
            .field("plugins", &backups.len())
            .field("backups", &backups.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
