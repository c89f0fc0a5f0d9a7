//! Weft plugins
//!
//! The two stateful plugin services built on the kernel contracts:
//! - hot reload: file-change driven, debounced reloads with state carried across
//! - lifecycle: update checks, installs, rollback plans and backups

pub mod hot_reload;
pub mod lifecycle;

mod native;

pub use hot_reload::{
    HotReloadBuilder, HotReloadManager, NotifyWatchHost, PluginLoader, ReloadError, ReloadPhase,
    ReloadResult, StateManager, StateSnapshot, WatchStatus,
};
pub use lifecycle::{
    BackupManager, BackupReason, LifecycleError, LifecycleVersionManager, PluginBackup,
    PluginUpdater, PluginVersion, RollbackManager, RollbackPlan, RollbackResult, UpdateInfo,
    UpdateOptions, UpdateResult, VersionLedger,
};
