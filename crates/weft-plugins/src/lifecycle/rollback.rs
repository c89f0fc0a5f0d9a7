//! Version rollback
//!
//! Rolls a plugin back to a previously installed version: optional
//! pre-rollback backup, host restore, then the registered data migrations
//! between the two versions, newest first.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

use weft_kernel::host::{StorageBackend, VersionHost};
use weft_kernel::{OperationKind, PluginLocks};

use super::backup::{BackupManager, BackupReason};
use super::error::{LifecycleError, LifecycleResult};
use super::ledger::VersionLedger;
use super::version::PluginVersion;
use crate::native::{bounded, panic_message};

const BACKUP_STEP_MS: u64 = 1000;
const RESTORE_STEP_MS: u64 = 2000;
const MIGRATION_STEP_MS: u64 = 1500;

/// Rollback targets for one plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackInfo {
    pub plugin_id: String,
    pub current_version: Option<String>,
    /// Retained versions, most recently installed first
    pub available_versions: Vec<String>,
    pub can_rollback: bool,
}

/// Describes a data migration between two adjacent versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationScript {
    pub from_version: String,
    pub to_version: String,
    pub description: String,
    /// The migration drops data the newer version stored
    #[serde(default)]
    pub data_loss: bool,
}

impl MigrationScript {
    pub fn new(
        from_version: impl Into<String>,
        to_version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            from_version: from_version.into(),
            to_version: to_version.into(),
            description: description.into(),
            data_loss: false,
        }
    }

    pub fn with_data_loss(mut self) -> Self {
        self.data_loss = true;
        self
    }
}

/// Rewrites a plugin's stored data for an older version
#[async_trait]
pub trait MigrationAction: Send + Sync {
    async fn migrate(&self, plugin_id: &str, storage: &dyn StorageBackend) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackAction {
    Backup,
    Restore,
    Migrate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub action: RollbackAction,
    pub description: String,
    pub estimated_ms: u64,
}

/// Descriptive rollback plan; building one changes nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPlan {
    pub plugin_id: String,
    pub from_version: String,
    pub to_version: String,
    pub steps: Vec<RollbackStep>,
    /// In execution order, from the current version toward the target
    pub migrations: Vec<MigrationScript>,
    pub estimated_duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOptions {
    pub create_backup: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub plugin_id: String,
    pub success: bool,
    pub previous_version: Option<String>,
    /// Version the host restored, even when a later migration failed
    pub restored_version: Option<String>,
    pub backup_id: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub warnings: Vec<String>,
    /// Why the target is not compatible
    pub reason: Option<String>,
}

impl CompatibilityReport {
    fn incompatible(reason: impl fmt::Display) -> Self {
        Self {
            compatible: false,
            warnings: Vec::new(),
            reason: Some(reason.to_string()),
        }
    }
}

struct RegisteredMigration {
    script: MigrationScript,
    from: PluginVersion,
    to: PluginVersion,
    action: Arc<dyn MigrationAction>,
}

pub struct RollbackManager {
    versions: Arc<dyn VersionHost>,
    ledger: Arc<VersionLedger>,
    backups: Arc<BackupManager>,
    locks: Arc<PluginLocks>,
    native_timeout: Duration,
    migrations: RwLock<HashMap<String, Vec<RegisteredMigration>>>,
    history: RwLock<HashMap<String, Vec<RollbackResult>>>,
}

impl RollbackManager {
    pub fn new(
        versions: Arc<dyn VersionHost>,
        ledger: Arc<VersionLedger>,
        backups: Arc<BackupManager>,
        locks: Arc<PluginLocks>,
        native_timeout: Duration,
    ) -> Self {
        Self {
            versions,
            ledger,
            backups,
            locks,
            native_timeout,
            migrations: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Register a data migration for `plugin_id`. A script for the same
    /// version pair replaces the earlier one.
    pub fn register_migration(
        &self,
        plugin_id: &str,
        script: MigrationScript,
        action: Arc<dyn MigrationAction>,
    ) -> LifecycleResult<()> {
        let from = PluginVersion::parse(&script.from_version)?;
        let to = PluginVersion::parse(&script.to_version)?;

        let mut migrations = self.migrations.write();
        let list = migrations.entry(plugin_id.to_string()).or_default();
        list.retain(|m| !(m.from == from && m.to == to));
        info!(plugin_id, from = %script.from_version, to = %script.to_version, "Registered migration");
        list.push(RegisteredMigration {
            script,
            from,
            to,
            action,
        });
        Ok(())
    }

    pub fn get_rollback_info(&self, plugin_id: &str) -> RollbackInfo {
        let available_versions = self.ledger.retained_versions(plugin_id);
        RollbackInfo {
            plugin_id: plugin_id.to_string(),
            current_version: self.ledger.current(plugin_id),
            can_rollback: !available_versions.is_empty(),
            available_versions,
        }
    }

    /// Describe the rollback of `plugin_id` to `target`.
    pub fn create_rollback_plan(&self, plugin_id: &str, target: &str) -> LifecycleResult<RollbackPlan> {
        let current = self
            .ledger
            .current(plugin_id)
            .ok_or_else(|| LifecycleError::NotTracked(plugin_id.to_string()))?;
        let target_version = PluginVersion::parse(target)?;
        if !self.ledger.is_retained(plugin_id, target) {
            return Err(LifecycleError::VersionNotRetained {
                plugin_id: plugin_id.to_string(),
                version: target.to_string(),
            });
        }

        let migrations = match PluginVersion::parse(&current) {
            Ok(current_version) => self.migrations_between(plugin_id, &current_version, &target_version),
            Err(e) => {
                warn!(plugin_id, error = %e, "Current version unparsable, planning without migrations");
                Vec::new()
            }
        };

        let mut steps = vec![
            RollbackStep {
                action: RollbackAction::Backup,
                description: format!("Back up data of {plugin_id} {current}"),
                estimated_ms: BACKUP_STEP_MS,
            },
            RollbackStep {
                action: RollbackAction::Restore,
                description: format!("Restore {plugin_id} {target}"),
                estimated_ms: RESTORE_STEP_MS,
            },
        ];
        steps.extend(migrations.iter().map(|m| RollbackStep {
            action: RollbackAction::Migrate,
            description: format!(
                "Migrate data {} -> {}: {}",
                m.from_version, m.to_version, m.description
            ),
            estimated_ms: MIGRATION_STEP_MS,
        }));

        Ok(RollbackPlan {
            plugin_id: plugin_id.to_string(),
            from_version: current,
            to_version: target.to_string(),
            estimated_duration_ms: steps.iter().map(|s| s.estimated_ms).sum(),
            steps,
            migrations,
        })
    }

    /// Scripts with `from` in `(target, current]` and `to` in
    /// `[target, current)`, newest `from` first.
    fn migrations_between(
        &self,
        plugin_id: &str,
        current: &PluginVersion,
        target: &PluginVersion,
    ) -> Vec<MigrationScript> {
        let migrations = self.migrations.read();
        let Some(list) = migrations.get(plugin_id) else {
            return Vec::new();
        };

        let mut selected: Vec<&RegisteredMigration> = list
            .iter()
            .filter(|m| &m.from > target && &m.from <= current)
            .filter(|m| &m.to >= target && &m.to < current)
            .collect();
        selected.sort_by(|a, b| b.from.cmp(&a.from).then_with(|| b.to.cmp(&a.to)));
        selected.into_iter().map(|m| m.script.clone()).collect()
    }

    fn migration_action(&self, plugin_id: &str, script: &MigrationScript) -> Option<Arc<dyn MigrationAction>> {
        self.migrations.read().get(plugin_id).and_then(|list| {
            list.iter()
                .find(|m| m.script == *script)
                .map(|m| m.action.clone())
        })
    }

    /// Check whether `target` is a sensible rollback target.
    pub fn check_version_compatibility(&self, plugin_id: &str, target: &str) -> CompatibilityReport {
        let Some(current) = self.ledger.current(plugin_id) else {
            return CompatibilityReport::incompatible(LifecycleError::NotTracked(plugin_id.to_string()));
        };
        let target_version = match PluginVersion::parse(target) {
            Ok(version) => version,
            Err(e) => return CompatibilityReport::incompatible(e),
        };
        if current == target {
            return CompatibilityReport::incompatible(LifecycleError::AlreadyInstalled {
                version: target.to_string(),
            });
        }
        if !self.ledger.is_retained(plugin_id, target) {
            return CompatibilityReport::incompatible(LifecycleError::VersionNotRetained {
                plugin_id: plugin_id.to_string(),
                version: target.to_string(),
            });
        }

        let mut warnings = Vec::new();
        if let Ok(current_version) = PluginVersion::parse(&current) {
            if !current_version.is_compatible(&target_version) {
                warnings.push(format!(
                    "Major version change {current} -> {target}; stored data may not be readable"
                ));
            }
            for script in self.migrations_between(plugin_id, &current_version, &target_version) {
                if script.data_loss {
                    warnings.push(format!(
                        "Migration {} -> {} may lose data: {}",
                        script.from_version, script.to_version, script.description
                    ));
                }
            }
        }
        if target_version.is_prerelease() {
            warnings.push(format!("Target version {target} is a pre-release"));
        }

        CompatibilityReport {
            compatible: true,
            warnings,
            reason: None,
        }
    }

    /// Roll `plugin_id` back to `target`.
    pub async fn execute_rollback(
        &self,
        plugin_id: &str,
        target: &str,
        options: RollbackOptions,
    ) -> RollbackResult {
        let guard = self.locks.acquire(plugin_id, OperationKind::Rollback).await;
        let result = self.run_rollback(plugin_id, target, options).await;
        drop(guard);

        match &result.error {
            None => info!(plugin_id, version = target, "Plugin rolled back"),
            Some(e) => error!(plugin_id, version = target, error = %e, "Plugin rollback failed"),
        }
        self.history
            .write()
            .entry(plugin_id.to_string())
            .or_default()
            .push(result.clone());
        result
    }

    async fn run_rollback(&self, plugin_id: &str, target: &str, options: RollbackOptions) -> RollbackResult {
        let mut result = RollbackResult {
            plugin_id: plugin_id.to_string(),
            success: false,
            previous_version: self.ledger.current(plugin_id),
            restored_version: None,
            backup_id: None,
            error: None,
            timestamp: Utc::now(),
        };
        let fail = |mut result: RollbackResult, error: LifecycleError| {
            result.error = Some(error.to_string());
            result.timestamp = Utc::now();
            result
        };

        let Some(current) = result.previous_version.clone() else {
            return fail(result, LifecycleError::NotTracked(plugin_id.to_string()));
        };
        if !self.get_rollback_info(plugin_id).can_rollback {
            return fail(result, LifecycleError::NothingToRollBack(plugin_id.to_string()));
        }
        let plan = match self.create_rollback_plan(plugin_id, target) {
            Ok(plan) => plan,
            Err(e) => return fail(result, e),
        };

        if options.create_backup {
            match self
                .backups
                .create_backup(plugin_id, &current, BackupReason::PreRollback)
                .await
            {
                Ok(backup) => result.backup_id = Some(backup.id),
                Err(e) => return fail(result, e),
            }
        }

        info!(plugin_id, from = %current, to = target, "Restoring plugin version");
        if let Err(e) = bounded(
            "restore",
            self.native_timeout,
            self.versions.restore(plugin_id, target),
        )
        .await
        {
            return fail(result, LifecycleError::from(e));
        }
        self.ledger.record_install(plugin_id, target);
        result.restored_version = Some(target.to_string());

        for script in &plan.migrations {
            if let Err(e) = self.run_migration(plugin_id, script).await {
                return fail(result, e);
            }
        }

        result.success = true;
        result.timestamp = Utc::now();
        result
    }

    async fn run_migration(&self, plugin_id: &str, script: &MigrationScript) -> LifecycleResult<()> {
        let failed = |message: String| LifecycleError::MigrationFailed {
            from: script.from_version.clone(),
            to: script.to_version.clone(),
            message,
        };
        let Some(action) = self.migration_action(plugin_id, script) else {
            return Err(failed("migration was unregistered".to_string()));
        };

        info!(plugin_id, from = %script.from_version, to = %script.to_version, "Running migration");
        let storage = self.backups.storage().clone();
        let run = action.migrate(plugin_id, storage.as_ref());
        match tokio::time::timeout(self.native_timeout, AssertUnwindSafe(run).catch_unwind()).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(failed(format!("{e:#}"))),
            Ok(Err(panic)) => Err(failed(format!("panicked: {}", panic_message(&*panic)))),
            Err(_) => Err(failed(format!(
                "timed out after {}ms",
                self.native_timeout.as_millis()
            ))),
        }
    }

    /// Roll back to the most recently installed earlier version.
    pub async fn rollback_to_previous(&self, plugin_id: &str) -> RollbackResult {
        let info = self.get_rollback_info(plugin_id);
        match info.available_versions.first() {
            Some(target) => {
                self.execute_rollback(plugin_id, target, RollbackOptions::default())
                    .await
            }
            None => RollbackResult {
                plugin_id: plugin_id.to_string(),
                success: false,
                previous_version: info.current_version,
                restored_version: None,
                backup_id: None,
                error: Some(LifecycleError::NothingToRollBack(plugin_id.to_string()).to_string()),
                timestamp: Utc::now(),
            },
        }
    }

    /// Rollback results for one plugin, oldest first.
    pub fn history(&self, plugin_id: &str) -> Vec<RollbackResult> {
        self.history
            .read()
            .get(plugin_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl fmt::Debug for RollbackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackManager")
            .field("migrations", &self.migrations.read().values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
