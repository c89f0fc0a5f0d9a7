//! Native host boundary
//!
//! The runtime core never touches the file system, module cache or package
//! store directly. Everything it needs from the host process goes through
//! these ports, each a narrow async trait that can be backed by a desktop
//! shell, a test double or another process.

mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::broadcast;

/// Failure reported by a host primitive
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum HostError {
    #[error("Host primitive unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl HostError {
    pub fn failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// File-change notification kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    Create,
    Modify,
    Delete,
    Rename,
}

/// One file-change notification from the native watcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    #[serde(rename = "type")]
    pub kind: FileChangeKind,
    pub path: PathBuf,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl FileChangeEvent {
    pub fn new(kind: FileChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now().timestamp_millis().max(0) as u64,
        }
    }
}

/// File observation primitives
#[async_trait]
pub trait FileWatchHost: Send + Sync {
    async fn watch_start(&self, paths: &[PathBuf]) -> HostResult<()>;

    async fn watch_stop(&self) -> HostResult<()>;

    /// Change-notification channel. Each call returns a fresh receiver.
    fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent>;
}

/// Module-level primitives for a loaded plugin
#[async_trait]
pub trait ModuleHost: Send + Sync {
    async fn reload(&self, plugin_id: &str) -> HostResult<()>;

    async fn invalidate_cache(&self, plugin_id: &str) -> HostResult<()>;

    /// Runtime state the plugin exposes for transfer across a reload.
    async fn get_state(&self, plugin_id: &str) -> HostResult<Option<Value>>;

    async fn set_state(&self, plugin_id: &str, state: Value) -> HostResult<()>;
}

/// Version primitives used by the updater and rollback
#[async_trait]
pub trait VersionHost: Send + Sync {
    async fn install(&self, plugin_id: &str, version: &str) -> HostResult<()>;

    async fn restore(&self, plugin_id: &str, version: &str) -> HostResult<()>;
}

/// Key/value persistent storage
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> HostResult<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> HostResult<()>;

    async fn delete(&self, key: &str) -> HostResult<()>;
}

/// Storage key holding a plugin's persisted data
pub fn storage_key(plugin_id: &str) -> String {
    format!("plugin-storage:{plugin_id}")
}

/// Latest version known to the marketplace for one plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceEntry {
    pub id: String,
    pub latest_version: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub release_notes: Option<String>,
}

/// Version metadata lookup
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// `Ok(None)` when the marketplace does not list the plugin.
    async fn latest(&self, plugin_id: &str) -> HostResult<Option<MarketplaceEntry>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKind {
    Info,
    Success,
    Warning,
    Error,
}

/// User-facing notification side channel
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str, kind: NotifyKind);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, kind: NotifyKind) {
        match kind {
            NotifyKind::Error => tracing::error!("{message}"),
            NotifyKind::Warning => tracing::warn!("{message}"),
            NotifyKind::Info | NotifyKind::Success => tracing::info!("{message}"),
        }
    }
}
