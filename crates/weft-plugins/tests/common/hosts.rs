//! Recording host doubles.
//!
//! Each fake counts the calls it receives so tests can assert on what crossed
//! the host boundary, not only on returned results.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use weft_kernel::host::{
    FileChangeEvent, FileChangeKind, FileWatchHost, HostError, HostResult, Marketplace,
    MarketplaceEntry, ModuleHost, Notifier, NotifyKind, VersionHost,
};

// ─────────────────────────────────────────────────────────────────────────────
// Module host
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeModule {
    reloads: AtomicUsize,
    invalidations: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    runtime: Mutex<HashMap<String, Value>>,
    restored: Mutex<Vec<(String, Value)>>,
}

impl FakeModule {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, plugin_id: &str) {
        self.failing.lock().insert(plugin_id.to_string());
    }

    pub fn recover(&self, plugin_id: &str) {
        self.failing.lock().remove(plugin_id);
    }

    pub fn set_runtime_state(&self, plugin_id: &str, state: Value) {
        self.runtime.lock().insert(plugin_id.to_string(), state);
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Runtime states written back through `set_state`, in call order.
    pub fn restored(&self) -> Vec<(String, Value)> {
        self.restored.lock().clone()
    }
}

#[async_trait]
impl ModuleHost for FakeModule {
    async fn reload(&self, plugin_id: &str) -> HostResult<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(plugin_id) {
            return Err(HostError::failed("reload", format!("{plugin_id}: syntax error")));
        }
        Ok(())
    }

    async fn invalidate_cache(&self, _plugin_id: &str) -> HostResult<()> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_state(&self, plugin_id: &str) -> HostResult<Option<Value>> {
        Ok(self.runtime.lock().get(plugin_id).cloned())
    }

    async fn set_state(&self, plugin_id: &str, state: Value) -> HostResult<()> {
        self.restored.lock().push((plugin_id.to_string(), state));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File watch host
// ─────────────────────────────────────────────────────────────────────────────

pub struct FakeWatch {
    sender: broadcast::Sender<FileChangeEvent>,
    started: Mutex<Vec<Vec<PathBuf>>>,
    stops: AtomicUsize,
}

impl FakeWatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sender: broadcast::channel(64).0,
            started: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        })
    }

    /// Push a modify notification as the native watcher would.
    pub fn touch(&self, path: &str) {
        let _ = self
            .sender
            .send(FileChangeEvent::new(FileChangeKind::Modify, path));
    }

    /// Path lists passed to each `watch_start`.
    pub fn started(&self) -> Vec<Vec<PathBuf>> {
        self.started.lock().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileWatchHost for FakeWatch {
    async fn watch_start(&self, paths: &[PathBuf]) -> HostResult<()> {
        self.started.lock().push(paths.to_vec());
        Ok(())
    }

    async fn watch_stop(&self) -> HostResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.sender.subscribe()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Version host
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeVersions {
    installs: Mutex<Vec<(String, String)>>,
    restores: Mutex<Vec<(String, String)>>,
    delay: Mutex<Duration>,
    reject: Mutex<HashSet<String>>,
}

impl FakeVersions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every install and restore take `delay`.
    pub fn slow(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Fail installs and restores of `version`.
    pub fn reject(&self, version: &str) {
        self.reject.lock().insert(version.to_string());
    }

    pub fn installs(&self) -> Vec<(String, String)> {
        self.installs.lock().clone()
    }

    pub fn restores(&self) -> Vec<(String, String)> {
        self.restores.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.installs.lock().len() + self.restores.lock().len()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn check(&self, operation: &str, version: &str) -> HostResult<()> {
        if self.reject.lock().contains(version) {
            return Err(HostError::failed(operation, format!("{version} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl VersionHost for FakeVersions {
    async fn install(&self, plugin_id: &str, version: &str) -> HostResult<()> {
        self.installs
            .lock()
            .push((plugin_id.to_string(), version.to_string()));
        self.pause().await;
        self.check("install", version)
    }

    async fn restore(&self, plugin_id: &str, version: &str) -> HostResult<()> {
        self.restores
            .lock()
            .push((plugin_id.to_string(), version.to_string()));
        self.pause().await;
        self.check("restore", version)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Marketplace
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeMarketplace {
    listings: Mutex<HashMap<String, MarketplaceEntry>>,
    lookups: AtomicUsize,
}

impl FakeMarketplace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publish(&self, plugin_id: &str, version: &str) {
        self.publish_entry(MarketplaceEntry {
            id: plugin_id.to_string(),
            latest_version: version.to_string(),
            updated_at: Utc::now(),
            prerelease: false,
            release_notes: Some(format!("{plugin_id} {version}")),
        });
    }

    pub fn publish_entry(&self, entry: MarketplaceEntry) {
        self.listings.lock().insert(entry.id.clone(), entry);
    }

    pub fn delist(&self, plugin_id: &str) {
        self.listings.lock().remove(plugin_id);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Marketplace for FakeMarketplace {
    async fn latest(&self, plugin_id: &str) -> HostResult<Option<MarketplaceEntry>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.listings.lock().get(plugin_id).cloned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notifier
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, NotifyKind)>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<(String, NotifyKind)> {
        self.messages.lock().clone()
    }

    pub fn count(&self, kind: NotifyKind) -> usize {
        self.messages.lock().iter().filter(|(_, k)| *k == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, kind: NotifyKind) {
        self.messages.lock().push((message.to_string(), kind));
    }
}
