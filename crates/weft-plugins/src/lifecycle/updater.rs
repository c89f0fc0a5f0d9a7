//! Plugin update checks and installs
//!
//! A check asks the marketplace for the latest version of each tracked plugin
//! and records a pending update when it is newer than the installed one. The
//! latest check for a plugin replaces whatever an earlier check recorded.
//! `update` installs a pending (or forced) version under the plugin's
//! exclusion guard, after taking a pre-update backup.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use weft_kernel::config::AutoUpdateConfig;
use weft_kernel::host::{Marketplace, MarketplaceEntry, Notifier, NotifyKind, VersionHost};
use weft_kernel::{OperationKind, PluginLocks};

use super::backup::{BackupManager, BackupReason};
use super::error::{LifecycleError, LifecycleResult};
use super::ledger::VersionLedger;
use super::version::PluginVersion;
use crate::native::{bounded, panic_message};

/// A newer version found by an update check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub plugin_id: String,
    pub current_version: String,
    pub latest_version: String,
    /// Marketplace publish time of `latest_version`
    pub updated_at: DateTime<Utc>,
    pub prerelease: bool,
    pub release_notes: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Install even without a pending update; needs `version`
    pub force: bool,
    /// Version to install instead of the pending one
    pub version: Option<String>,
}

impl UpdateOptions {
    pub fn forced(version: impl Into<String>) -> Self {
        Self {
            force: true,
            version: Some(version.into()),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub plugin_id: String,
    pub success: bool,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    pub backup_id: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UpdateResult {
    fn failed(plugin_id: &str, error: impl fmt::Display) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            success: false,
            from_version: None,
            to_version: None,
            backup_id: None,
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    Checking,
    Backup,
    Installing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProgress {
    pub plugin_id: String,
    pub stage: UpdateStage,
    pub percent: u8,
}

/// Handle returned by [`PluginUpdater::on_progress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressCallbackId(u64);

pub type ProgressCallback = Arc<dyn Fn(&UpdateProgress) + Send + Sync>;

#[derive(Default)]
struct AutoUpdateState {
    config: AutoUpdateConfig,
    /// Stops the schedule loop between cycles
    stop: Option<watch::Sender<bool>>,
}

impl AutoUpdateState {
    fn halt(&mut self) -> bool {
        match self.stop.take() {
            Some(stop) => {
                let _ = stop.send(true);
                true
            }
            None => false,
        }
    }
}

struct Inner {
    marketplace: Arc<dyn Marketplace>,
    versions: Arc<dyn VersionHost>,
    ledger: Arc<VersionLedger>,
    backups: Arc<BackupManager>,
    locks: Arc<PluginLocks>,
    notifier: Arc<dyn Notifier>,
    native_timeout: Duration,
    pending: RwLock<HashMap<String, UpdateInfo>>,
    history: RwLock<HashMap<String, Vec<UpdateResult>>>,
    progress: RwLock<Vec<(ProgressCallbackId, ProgressCallback)>>,
    next_id: AtomicU64,
    auto: Mutex<AutoUpdateState>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.auto.get_mut().halt();
    }
}

/// Update checker and installer
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PluginUpdater {
    inner: Arc<Inner>,
}

impl PluginUpdater {
    pub fn new(
        marketplace: Arc<dyn Marketplace>,
        versions: Arc<dyn VersionHost>,
        ledger: Arc<VersionLedger>,
        backups: Arc<BackupManager>,
        locks: Arc<PluginLocks>,
        notifier: Arc<dyn Notifier>,
        native_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                marketplace,
                versions,
                ledger,
                backups,
                locks,
                notifier,
                native_timeout,
                pending: RwLock::new(HashMap::new()),
                history: RwLock::new(HashMap::new()),
                progress: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                auto: Mutex::new(AutoUpdateState::default()),
            }),
        }
    }

    /// Start tracking an installed plugin. Re-tracking with the current
    /// version is a no-op.
    pub fn track(&self, plugin_id: &str, installed_version: &str) {
        if self.inner.ledger.current(plugin_id).as_deref() != Some(installed_version) {
            self.inner.ledger.record_install(plugin_id, installed_version);
        }
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    /// Check each plugin in turn. Returns the updates found.
    pub async fn check_for_updates(&self, plugin_ids: &[String]) -> Vec<UpdateInfo> {
        let mut found = Vec::new();
        for plugin_id in plugin_ids {
            if let Some(info) = self.check_plugin_update(plugin_id).await {
                found.push(info);
            }
        }
        info!(checked = plugin_ids.len(), found = found.len(), "Update check finished");
        found
    }

    /// Check every tracked plugin.
    pub async fn check_all(&self) -> Vec<UpdateInfo> {
        self.check_for_updates(&self.inner.ledger.tracked()).await
    }

    /// Check one plugin. A check that finds nothing newer clears an earlier
    /// pending entry.
    pub async fn check_plugin_update(&self, plugin_id: &str) -> Option<UpdateInfo> {
        let Some(current) = self.inner.ledger.current(plugin_id) else {
            warn!(plugin_id, "Update check for untracked plugin");
            return None;
        };

        let entry = match bounded(
            "marketplace.latest",
            self.inner.native_timeout,
            self.inner.marketplace.latest(plugin_id),
        )
        .await
        {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(plugin_id, "Plugin not listed in marketplace");
                self.inner.pending.write().remove(plugin_id);
                return None;
            }
            Err(e) => {
                warn!(plugin_id, error = %e, "Update check failed");
                return None;
            }
        };

        let allow_prerelease = self.inner.auto.lock().config.allow_prerelease;
        if !is_update(&current, &entry, allow_prerelease) {
            self.inner.pending.write().remove(plugin_id);
            return None;
        }

        let info = UpdateInfo {
            plugin_id: plugin_id.to_string(),
            current_version: current,
            latest_version: entry.latest_version,
            updated_at: entry.updated_at,
            prerelease: entry.prerelease,
            release_notes: entry.release_notes,
            checked_at: Utc::now(),
        };
        info!(
            plugin_id,
            current = %info.current_version,
            latest = %info.latest_version,
            "Update available"
        );
        self.inner
            .pending
            .write()
            .insert(plugin_id.to_string(), info.clone());
        Some(info)
    }

    // ------------------------------------------------------------------
    // Installs
    // ------------------------------------------------------------------

    /// Install the pending update for `plugin_id`, or `options.version` when
    /// forced.
    ///
    /// Without a pending entry and without `force` this fails fast and makes
    /// no host call.
    pub async fn update(&self, plugin_id: &str, options: UpdateOptions) -> UpdateResult {
        let pending = self.pending_update(plugin_id);
        let target = match (options.version.clone(), &pending) {
            (Some(version), _) if options.force => version,
            (Some(version), Some(_)) => version,
            (None, Some(info)) => info.latest_version.clone(),
            _ => return UpdateResult::failed(plugin_id, LifecycleError::NoPendingUpdate),
        };

        let guard = self.inner.locks.acquire(plugin_id, OperationKind::Update).await;
        let result = self.install(plugin_id, &target, &options).await;
        drop(guard);

        self.inner
            .history
            .write()
            .entry(plugin_id.to_string())
            .or_default()
            .push(result.clone());

        let (message, kind) = match &result.error {
            None => (
                format!("{plugin_id} updated to {target}"),
                NotifyKind::Success,
            ),
            Some(e) => (
                format!("Update of {plugin_id} failed: {e}"),
                NotifyKind::Error,
            ),
        };
        self.inner.notifier.notify(&message, kind);

        result
    }

    async fn install(&self, plugin_id: &str, target: &str, options: &UpdateOptions) -> UpdateResult {
        self.report(plugin_id, UpdateStage::Checking, 0);

        let from = self.inner.ledger.current(plugin_id);
        let mut result = UpdateResult {
            plugin_id: plugin_id.to_string(),
            success: false,
            from_version: from.clone(),
            to_version: Some(target.to_string()),
            backup_id: None,
            error: None,
            timestamp: Utc::now(),
        };

        if let Err(e) = PluginVersion::parse(target) {
            return self.fail(result, e);
        }
        if from.as_deref() == Some(target) && !options.force {
            let error = LifecycleError::AlreadyInstalled {
                version: target.to_string(),
            };
            return self.fail(result, error);
        }

        if let Some(from) = &from {
            self.report(plugin_id, UpdateStage::Backup, 25);
            match self
                .inner
                .backups
                .create_backup(plugin_id, from, BackupReason::PreUpdate)
                .await
            {
                Ok(backup) => result.backup_id = Some(backup.id),
                Err(e) => warn!(plugin_id, error = %e, "Pre-update backup failed"),
            }
        }

        self.report(plugin_id, UpdateStage::Installing, 50);
        info!(plugin_id, from = ?from, to = target, "Installing update");
        if let Err(e) = bounded(
            "install",
            self.inner.native_timeout,
            self.inner.versions.install(plugin_id, target),
        )
        .await
        {
            return self.fail(result, LifecycleError::from(e));
        }

        self.inner.ledger.record_install(plugin_id, target);
        self.inner.pending.write().remove(plugin_id);

        result.success = true;
        result.timestamp = Utc::now();
        self.report(plugin_id, UpdateStage::Completed, 100);
        info!(plugin_id, version = target, "Plugin updated");
        result
    }

    fn fail(&self, mut result: UpdateResult, error: LifecycleError) -> UpdateResult {
        error!(plugin_id = %result.plugin_id, error = %error, "Plugin update failed");
        self.report(&result.plugin_id, UpdateStage::Failed, 100);
        result.error = Some(error.to_string());
        result.timestamp = Utc::now();
        result
    }

    /// Install every pending update, one plugin at a time.
    pub async fn update_all(&self) -> Vec<UpdateResult> {
        let mut results = Vec::new();
        for info in self.pending() {
            results.push(self.update(&info.plugin_id, UpdateOptions::default()).await);
        }
        results
    }

    // ------------------------------------------------------------------
    // Auto update
    // ------------------------------------------------------------------

    /// Apply an auto-update configuration, replacing any running schedule.
    ///
    /// An enabled schedule is spawned on the current tokio runtime; calling
    /// this outside one returns [`LifecycleError::NoRuntime`]. A cycle already
    /// in progress under the old schedule runs to completion.
    pub fn configure_auto_update(&self, config: AutoUpdateConfig) -> LifecycleResult<()> {
        if config.enabled && config.check_interval_secs == 0 {
            return Err(LifecycleError::InvalidConfig(
                "check interval must be greater than zero".to_string(),
            ));
        }
        let runtime = if config.enabled {
            Some(Handle::try_current().map_err(|e| LifecycleError::NoRuntime(e.to_string()))?)
        } else {
            None
        };

        let mut auto = self.inner.auto.lock();
        auto.halt();

        if let Some(runtime) = runtime {
            let interval = config.check_interval();
            let weak = Arc::downgrade(&self.inner);
            let (stop, stopped) = watch::channel(false);
            runtime.spawn(auto_update_loop(weak, interval, stopped));
            auto.stop = Some(stop);
            info!(
                interval_secs = config.check_interval_secs,
                auto_install = config.installs_automatically(),
                "Auto update scheduled"
            );
        }
        auto.config = config;
        Ok(())
    }

    /// Stop the schedule, keeping the rest of the configuration.
    ///
    /// No further cycles start. A cycle that is already installing finishes
    /// and records its results.
    pub fn stop_auto_update(&self) -> bool {
        let mut auto = self.inner.auto.lock();
        auto.config.enabled = false;
        let stopped = auto.halt();
        if stopped {
            info!("Auto update stopped");
        }
        stopped
    }

    pub fn is_auto_update_running(&self) -> bool {
        self.inner.auto.lock().stop.is_some()
    }

    pub fn auto_update_config(&self) -> AutoUpdateConfig {
        self.inner.auto.lock().config.clone()
    }

    /// One scheduled cycle: check non-excluded tracked plugins, then install
    /// or announce what was found.
    pub async fn run_auto_update_cycle(&self) -> Vec<UpdateResult> {
        let config = self.auto_update_config();
        let plugin_ids: Vec<String> = self
            .inner
            .ledger
            .tracked()
            .into_iter()
            .filter(|id| !config.is_excluded(id))
            .collect();

        let found = self.check_for_updates(&plugin_ids).await;
        let mut results = Vec::new();
        for info in found {
            if config.installs_automatically() {
                results.push(self.update(&info.plugin_id, UpdateOptions::default()).await);
            } else {
                let message = format!(
                    "Update available for {}: {} -> {}",
                    info.plugin_id, info.current_version, info.latest_version
                );
                self.inner.notifier.notify(&message, NotifyKind::Info);
            }
        }
        results
    }

    // ------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------

    pub fn on_progress<F>(&self, callback: F) -> ProgressCallbackId
    where
        F: Fn(&UpdateProgress) + Send + Sync + 'static,
    {
        let id = ProgressCallbackId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.progress.write().push((id, Arc::new(callback)));
        id
    }

    pub fn remove_progress_callback(&self, id: ProgressCallbackId) -> bool {
        let mut callbacks = self.inner.progress.write();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    fn report(&self, plugin_id: &str, stage: UpdateStage, percent: u8) {
        let progress = UpdateProgress {
            plugin_id: plugin_id.to_string(),
            stage,
            percent,
        };
        let callbacks: Vec<ProgressCallback> = self
            .inner
            .progress
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&progress))) {
                error!(plugin_id, panic = %panic_message(&*panic), "Progress callback panicked");
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Pending updates, sorted by plugin id.
    pub fn pending(&self) -> Vec<UpdateInfo> {
        let mut pending: Vec<UpdateInfo> = self.inner.pending.read().values().cloned().collect();
        pending.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        pending
    }

    pub fn pending_update(&self, plugin_id: &str) -> Option<UpdateInfo> {
        self.inner.pending.read().get(plugin_id).cloned()
    }

    /// Update results for one plugin, oldest first.
    pub fn history(&self, plugin_id: &str) -> Vec<UpdateResult> {
        self.inner
            .history
            .read()
            .get(plugin_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn ledger(&self) -> &Arc<VersionLedger> {
        &self.inner.ledger
    }
}

impl fmt::Debug for PluginUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginUpdater")
            .field("pending", &self.inner.pending.read().len())
            .field("auto_update", &self.is_auto_update_running())
            .finish()
    }
}

/// Whether `entry` should be offered over `current`.
///
/// Parsable versions must be strictly newer; otherwise any difference counts.
fn is_update(current: &str, entry: &MarketplaceEntry, allow_prerelease: bool) -> bool {
    let latest = PluginVersion::parse(&entry.latest_version).ok();
    let prerelease = entry.prerelease || latest.as_ref().is_some_and(PluginVersion::is_prerelease);
    if prerelease && !allow_prerelease {
        return false;
    }

    match (PluginVersion::parse(current), latest) {
        (Ok(current), Some(latest)) => latest.is_newer_than(&current),
        _ => entry.latest_version != current,
    }
}

async fn auto_update_loop(inner: Weak<Inner>, interval: Duration, mut stopped: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        // Only the wait is cancellable; a started cycle always completes.
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stopped.wait_for(|stop| *stop) => break,
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        debug!("Running scheduled update check");
        PluginUpdater { inner }.run_auto_update_cycle().await;
    }
    debug!("Auto update loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use weft_kernel::host::{HostError, HostResult, LogNotifier, MemoryStorage};

    struct FixedMarketplace(Option<MarketplaceEntry>);

    #[async_trait]
    impl Marketplace for FixedMarketplace {
        async fn latest(&self, _plugin_id: &str) -> HostResult<Option<MarketplaceEntry>> {
            Ok(self.0.clone())
        }
    }

    struct RejectingVersions;

    #[async_trait]
    impl VersionHost for RejectingVersions {
        async fn install(&self, _plugin_id: &str, version: &str) -> HostResult<()> {
            Err(HostError::failed("install", format!("{version} is corrupt")))
        }

        async fn restore(&self, _plugin_id: &str, _version: &str) -> HostResult<()> {
            Ok(())
        }
    }

    fn entry(version: &str, prerelease: bool) -> MarketplaceEntry {
        MarketplaceEntry {
            id: "notes".into(),
            latest_version: version.into(),
            updated_at: Utc::now(),
            prerelease,
            release_notes: None,
        }
    }

    fn updater(latest: Option<MarketplaceEntry>) -> PluginUpdater {
        let storage = Arc::new(MemoryStorage::new());
        PluginUpdater::new(
            Arc::new(FixedMarketplace(latest)),
            Arc::new(RejectingVersions),
            Arc::new(VersionLedger::new()),
            Arc::new(BackupManager::new(storage, Duration::from_secs(1))),
            Arc::new(PluginLocks::new()),
            Arc::new(LogNotifier),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_is_update() {
        assert!(is_update("1.0.0", &entry("1.1.0", false), false));
        assert!(!is_update("1.1.0", &entry("1.0.0", false), false));
        assert!(!is_update("1.0.0", &entry("1.0.0", false), false));
        assert!(!is_update("1.0.0", &entry("2.0.0-beta.1", false), false));
        assert!(is_update("1.0.0", &entry("2.0.0-beta.1", false), true));
        assert!(!is_update("1.0.0", &entry("2.0.0", true), false));
        assert!(is_update("nightly", &entry("1.0.0", false), false));
    }

    #[tokio::test]
    async fn test_check_untracked_plugin() {
        let updater = updater(Some(entry("2.0.0", false)));
        assert_eq!(updater.check_plugin_update("notes").await, None);
        assert!(updater.pending().is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_keeps_pending_entry() {
        let updater = updater(Some(entry("2.0.0", false)));
        updater.track("notes", "1.0.0");
        assert!(updater.check_plugin_update("notes").await.is_some());

        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = stages.clone();
        updater.on_progress(move |p| seen.lock().push(p.stage));

        let result = updater.update("notes", UpdateOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or_default().contains("corrupt"));
        assert_eq!(result.from_version.as_deref(), Some("1.0.0"));
        assert_eq!(updater.ledger().current("notes").as_deref(), Some("1.0.0"));
        assert!(updater.pending_update("notes").is_some());
        assert_eq!(updater.history("notes").len(), 1);
        assert_eq!(
            *stages.lock(),
            vec![
                UpdateStage::Checking,
                UpdateStage::Backup,
                UpdateStage::Installing,
                UpdateStage::Failed
            ]
        );
    }

    #[tokio::test]
    async fn test_forced_update_needs_version() {
        let updater = updater(None);
        updater.track("notes", "1.0.0");

        let options = UpdateOptions {
            force: true,
            version: None,
        };
        let result = updater.update("notes", options).await;
        assert_eq!(result.error.as_deref(), Some("No pending update found"));
        assert!(updater.history("notes").is_empty());
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let updater = updater(None);
        let config = AutoUpdateConfig::new()
            .with_enabled(true)
            .with_check_interval(Duration::ZERO);
        assert!(matches!(
            updater.configure_auto_update(config),
            Err(LifecycleError::InvalidConfig(_))
        ));
        assert!(!updater.is_auto_update_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_update_schedule_replaced_and_stopped() {
        let updater = updater(None);
        let config = AutoUpdateConfig::new()
            .with_enabled(true)
            .with_check_interval(Duration::from_secs(60));
        updater.configure_auto_update(config.clone()).unwrap();
        assert!(updater.is_auto_update_running());

        updater
            .configure_auto_update(config.with_check_interval(Duration::from_secs(120)))
            .unwrap();
        assert_eq!(updater.auto_update_config().check_interval_secs, 120);
        assert!(updater.is_auto_update_running());

        assert!(updater.stop_auto_update());
        assert!(!updater.is_auto_update_running());
        assert!(!updater.stop_auto_update());
    }

    #[test]
    fn test_enabled_schedule_outside_runtime_is_rejected() {
        let updater = updater(None);
        let config = AutoUpdateConfig::new()
            .with_enabled(true)
            .with_check_interval(Duration::from_secs(60));
        assert!(matches!(
            updater.configure_auto_update(config),
            Err(LifecycleError::NoRuntime(_))
        ));
        assert!(!updater.is_auto_update_running());

        updater
            .configure_auto_update(AutoUpdateConfig::new().with_enabled(false))
            .unwrap();
    }
}
