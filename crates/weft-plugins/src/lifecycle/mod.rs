//! Plugin lifecycle: versions, updates, rollbacks and backups
//!
//! [`LifecycleVersionManager`] ties the pieces together over one
//! [`VersionLedger`] and one set of [`PluginLocks`], so an update, a rollback
//! and a hot reload of the same plugin never overlap.

mod backup;
mod error;
mod ledger;
mod rollback;
mod updater;
mod version;

use std::sync::Arc;
use std::time::Duration;

use weft_kernel::GlobalSlot;
use weft_kernel::PluginLocks;
use weft_kernel::config::AutoUpdateConfig;
use weft_kernel::host::{LogNotifier, Marketplace, MemoryStorage, Notifier, StorageBackend, VersionHost};

pub use backup::{BackupManager, BackupReason, PluginBackup};
pub use error::{LifecycleError, LifecycleResult};
pub use ledger::{InstalledVersion, VersionLedger};
pub use rollback::{
    CompatibilityReport, MigrationAction, MigrationScript, RollbackAction, RollbackInfo,
    RollbackManager, RollbackOptions, RollbackPlan, RollbackResult, RollbackStep,
};
pub use updater::{
    PluginUpdater, ProgressCallback, ProgressCallbackId, UpdateInfo, UpdateOptions, UpdateProgress,
    UpdateResult, UpdateStage,
};
pub use version::PluginVersion;

const DEFAULT_NATIVE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct LifecycleBuilder {
    marketplace: Arc<dyn Marketplace>,
    versions: Arc<dyn VersionHost>,
    storage: Option<Arc<dyn StorageBackend>>,
    notifier: Option<Arc<dyn Notifier>>,
    locks: Option<Arc<PluginLocks>>,
    native_timeout: Duration,
}

impl LifecycleBuilder {
    /// Storage holding `plugin-storage:<id>` values. Defaults to in-memory.
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Receives update announcements. Defaults to logging.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// In-flight markers shared with the hot-reload manager.
    pub fn with_locks(mut self, locks: Arc<PluginLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn with_native_timeout(mut self, timeout: Duration) -> Self {
        self.native_timeout = timeout;
        self
    }

    pub fn build(self) -> LifecycleVersionManager {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let locks = self.locks.unwrap_or_default();
        let ledger = Arc::new(VersionLedger::new());
        let backups = Arc::new(BackupManager::new(storage, self.native_timeout));

        let updater = PluginUpdater::new(
            self.marketplace,
            self.versions.clone(),
            ledger.clone(),
            backups.clone(),
            locks.clone(),
            notifier,
            self.native_timeout,
        );
        let rollback = Arc::new(RollbackManager::new(
            self.versions,
            ledger.clone(),
            backups.clone(),
            locks.clone(),
            self.native_timeout,
        ));

        LifecycleVersionManager {
            updater,
            rollback,
            backups,
            ledger,
            locks,
        }
    }
}

/// Facade over update, rollback and backup management
#[derive(Clone)]
pub struct LifecycleVersionManager {
    updater: PluginUpdater,
    rollback: Arc<RollbackManager>,
    backups: Arc<BackupManager>,
    ledger: Arc<VersionLedger>,
    locks: Arc<PluginLocks>,
}

impl LifecycleVersionManager {
    pub fn builder(marketplace: Arc<dyn Marketplace>, versions: Arc<dyn VersionHost>) -> LifecycleBuilder {
        LifecycleBuilder {
            marketplace,
            versions,
            storage: None,
            notifier: None,
            locks: None,
            native_timeout: DEFAULT_NATIVE_TIMEOUT,
        }
    }

    pub fn updater(&self) -> &PluginUpdater {
        &self.updater
    }

    pub fn rollback(&self) -> &RollbackManager {
        &self.rollback
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    pub fn locks(&self) -> Arc<PluginLocks> {
        self.locks.clone()
    }

    /// Start tracking an installed plugin.
    pub fn track(&self, plugin_id: &str, installed_version: &str) {
        self.updater.track(plugin_id, installed_version);
    }

    pub fn current_version(&self, plugin_id: &str) -> Option<String> {
        self.ledger.current(plugin_id)
    }

    pub async fn check_for_updates(&self, plugin_ids: &[String]) -> Vec<UpdateInfo> {
        self.updater.check_for_updates(plugin_ids).await
    }

    pub async fn update(&self, plugin_id: &str, options: UpdateOptions) -> UpdateResult {
        self.updater.update(plugin_id, options).await
    }

    pub async fn update_all(&self) -> Vec<UpdateResult> {
        self.updater.update_all().await
    }

    pub fn configure_auto_update(&self, config: AutoUpdateConfig) -> LifecycleResult<()> {
        self.updater.configure_auto_update(config)
    }

    pub fn get_rollback_info(&self, plugin_id: &str) -> RollbackInfo {
        self.rollback.get_rollback_info(plugin_id)
    }

    pub async fn execute_rollback(
        &self,
        plugin_id: &str,
        target: &str,
        options: RollbackOptions,
    ) -> RollbackResult {
        self.rollback.execute_rollback(plugin_id, target, options).await
    }

    pub async fn rollback_to_previous(&self, plugin_id: &str) -> RollbackResult {
        self.rollback.rollback_to_previous(plugin_id).await
    }
}

impl std::fmt::Debug for LifecycleVersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleVersionManager")
            .field("tracked", &self.ledger.tracked())
            .field("updater", &self.updater)
            .finish()
    }
}

static DEFAULT_LIFECYCLE: GlobalSlot<LifecycleVersionManager> = GlobalSlot::new();

/// Make `manager` the process-wide default.
pub fn install_default_lifecycle(manager: LifecycleVersionManager) {
    DEFAULT_LIFECYCLE.install(Arc::new(manager));
}

pub fn default_lifecycle() -> Option<Arc<LifecycleVersionManager>> {
    DEFAULT_LIFECYCLE.get()
}

/// Drop the process-wide default manager, stopping its auto-update schedule.
pub fn reset_default_lifecycle() {
    if let Some(manager) = DEFAULT_LIFECYCLE.reset() {
        manager.updater().stop_auto_update();
    }
}
