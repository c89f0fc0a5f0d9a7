//! Hot-reload manager
//!
//! Coordinates watching, debouncing and reloading.
//!
//! Per plugin id the manager moves through `Idle -> PendingReload -> Reloading`
//! and back to `Idle` (or `Failed`). A change arriving while a debounce timer
//! is armed restarts the timer, so a burst of edits yields one reload. Reloads
//! of the same id are serialized through the shared [`PluginLocks`], which
//! also keeps a reload from interleaving with an update or rollback.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use weft_kernel::bus::{EventSource, MessageBus};
use weft_kernel::config::HotReloadConfig;
use weft_kernel::host::{
    FileChangeEvent, FileWatchHost, HostError, MemoryStorage, ModuleHost, StorageBackend,
};
use weft_kernel::plugin::{Hook, HookRegistry, PluginDescriptor, PluginError};
use weft_kernel::{GlobalSlot, OperationKind, PluginLocks};

use super::state::{StateManager, StateSnapshot};
use super::watcher::{WatchedPlugin, resolve_plugin_id};
use super::{EVENT_RELOAD_FAILED, EVENT_RELOADED, EVENT_SOURCE};
use crate::native::{bounded, panic_message};

/// Outcome of one reload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadResult {
    pub plugin_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Snapshot restored after the reload, moved out of the state manager
    pub preserved_state: Option<StateSnapshot>,
    pub timestamp: DateTime<Utc>,
}

/// Reload error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReloadError {
    #[error("Loader failed: {0}")]
    Loader(String),

    #[error("Loader timed out after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    Host(#[from] HostError),
}

/// Reload state of one plugin id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPhase {
    #[default]
    Idle,
    /// Debounce timer armed
    PendingReload,
    Reloading,
    /// Last reload failed; behaves like `Idle` for new triggers
    Failed,
}

/// Outcome of [`HotReloadManager::start_watching`]
#[derive(Debug, Clone, PartialEq)]
pub enum WatchStatus {
    Started { plugins: usize, paths: usize },
    /// Hot reload is turned off in the configuration
    Disabled,
    /// No dev/local plugin root and no extra path to watch
    NoPaths,
    Failed(ReloadError),
}

/// Loads fresh plugin code and swaps it in for the running instance
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn load(&self, plugin_id: &str) -> anyhow::Result<()>;

    async fn reload(&self, plugin_id: &str) -> anyhow::Result<()>;
}

/// Handle returned by `on_reload` / `on_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

pub type ReloadCallback = Arc<dyn Fn(&ReloadResult) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallbackKind {
    Reload,
    Error,
}

struct RegisteredCallback {
    id: CallbackId,
    kind: CallbackKind,
    callback: ReloadCallback,
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct WatchSession {
    active: bool,
    plugins: Vec<WatchedPlugin>,
    listener: Option<JoinHandle<()>>,
}

struct Inner {
    config: RwLock<HotReloadConfig>,
    module: Arc<dyn ModuleHost>,
    watch: Arc<dyn FileWatchHost>,
    storage: Arc<dyn StorageBackend>,
    loader: Option<Arc<dyn PluginLoader>>,
    bus: Option<MessageBus>,
    hooks: Option<Arc<HookRegistry>>,
    locks: Arc<PluginLocks>,
    state: StateManager,
    /// Registered plugins in registration order
    plugins: RwLock<Vec<PluginDescriptor>>,
    session: Mutex<WatchSession>,
    timers: Mutex<HashMap<String, PendingTimer>>,
    phases: Mutex<HashMap<String, ReloadPhase>>,
    history: Mutex<VecDeque<ReloadResult>>,
    callbacks: RwLock<Vec<RegisteredCallback>>,
    next_id: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, timer) in self.timers.get_mut().drain() {
            timer.handle.abort();
        }
        if let Some(listener) = self.session.get_mut().listener.take() {
            listener.abort();
        }
    }
}

/// Builder for [`HotReloadManager`]
pub struct HotReloadBuilder {
    config: HotReloadConfig,
    module: Arc<dyn ModuleHost>,
    watch: Arc<dyn FileWatchHost>,
    storage: Option<Arc<dyn StorageBackend>>,
    loader: Option<Arc<dyn PluginLoader>>,
    bus: Option<MessageBus>,
    hooks: Option<Arc<HookRegistry>>,
    locks: Option<Arc<PluginLocks>>,
}

impl HotReloadBuilder {
    pub fn with_config(mut self, config: HotReloadConfig) -> Self {
        self.config = config;
        self
    }

    /// Storage holding `plugin-storage:<id>` values. Defaults to in-memory.
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Loader used instead of the host's native reload.
    pub fn with_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Bus receiving `plugin:reloaded` / `plugin:reload-failed`.
    pub fn with_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Hooks receiving `BeforeReload` / `AfterReload`.
    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// In-flight markers shared with the lifecycle manager.
    pub fn with_locks(mut self, locks: Arc<PluginLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn build(self) -> HotReloadManager {
        HotReloadManager {
            inner: Arc::new(Inner {
                config: RwLock::new(self.config),
                module: self.module,
                watch: self.watch,
                storage: self
                    .storage
                    .unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                loader: self.loader,
                bus: self.bus,
                hooks: self.hooks,
                locks: self.locks.unwrap_or_default(),
                state: StateManager::new(),
                plugins: RwLock::new(Vec::new()),
                session: Mutex::new(WatchSession::default()),
                timers: Mutex::new(HashMap::new()),
                phases: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                callbacks: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }
}

/// Hot-reload manager
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HotReloadManager {
    inner: Arc<Inner>,
}

impl HotReloadManager {
    pub fn builder(module: Arc<dyn ModuleHost>, watch: Arc<dyn FileWatchHost>) -> HotReloadBuilder {
        HotReloadBuilder {
            config: HotReloadConfig::default(),
            module,
            watch,
            storage: None,
            loader: None,
            bus: None,
            hooks: None,
            locks: None,
        }
    }

    pub fn config(&self) -> HotReloadConfig {
        self.inner.config.read().clone()
    }

    /// Replace the configuration. Disabling hot reload while watching stops
    /// the watcher.
    pub async fn set_config(&self, config: HotReloadConfig) {
        let disabled = !config.enabled;
        *self.inner.config.write() = config;

        if disabled && self.is_watching() {
            info!("Hot reload disabled, stopping watcher");
            self.stop_watching().await;
        }
    }

    pub fn locks(&self) -> Arc<PluginLocks> {
        self.inner.locks.clone()
    }

    // ------------------------------------------------------------------
    // Plugin registration
    // ------------------------------------------------------------------

    /// Add or replace a known plugin. Used by the next `start_watching`.
    pub fn register(&self, descriptor: PluginDescriptor) {
        let mut plugins = self.inner.plugins.write();
        match plugins.iter_mut().find(|p| p.id == descriptor.id) {
            Some(existing) => *existing = descriptor,
            None => {
                debug!(plugin_id = %descriptor.id, source = ?descriptor.source, "Registered plugin");
                plugins.push(descriptor);
            }
        }
    }

    /// Forget a plugin, cancelling its pending reload and dropping any kept
    /// snapshot.
    pub async fn unregister(&self, plugin_id: &str) -> Option<PluginDescriptor> {
        let removed = {
            let mut plugins = self.inner.plugins.write();
            let index = plugins.iter().position(|p| p.id == plugin_id);
            index.map(|i| plugins.remove(i))
        };

        if let Some(timer) = self.inner.timers.lock().remove(plugin_id) {
            timer.handle.abort();
        }
        self.inner
            .session
            .lock()
            .plugins
            .retain(|p| p.id != plugin_id);
        self.inner.phases.lock().remove(plugin_id);
        self.inner.state.clear(plugin_id).await;

        removed
    }

    pub fn registered_plugins(&self) -> Vec<PluginDescriptor> {
        self.inner.plugins.read().clone()
    }

    // ------------------------------------------------------------------
    // Watching
    // ------------------------------------------------------------------

    /// Register `plugins`, then start watching.
    pub async fn start_watching_plugins(&self, plugins: &[PluginDescriptor]) -> WatchStatus {
        for plugin in plugins {
            self.register(plugin.clone());
        }
        self.start_watching().await
    }

    /// Watch every registered dev/local plugin plus the configured extra
    /// paths. Restarts the watcher if it is already running.
    pub async fn start_watching(&self) -> WatchStatus {
        let config = self.config();
        if !config.enabled {
            warn!("Hot reload is disabled, not watching");
            return WatchStatus::Disabled;
        }

        if self.is_watching() {
            self.stop_watching().await;
        }

        let watched: Vec<WatchedPlugin> = self
            .inner
            .plugins
            .read()
            .iter()
            .filter(|p| p.source.is_watchable())
            .map(|p| WatchedPlugin::new(p.id.clone(), p.path.clone()))
            .collect();

        let mut paths: Vec<PathBuf> = Vec::new();
        for path in watched
            .iter()
            .filter_map(|p| p.root.clone())
            .chain(config.watch_paths.iter().cloned())
        {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            warn!("No plugin paths to watch");
            return WatchStatus::NoPaths;
        }

        let receiver = self.inner.watch.subscribe();
        let limit = config.native_timeout();
        if let Err(e) = bounded("watch_start", limit, self.inner.watch.watch_start(&paths)).await {
            error!(error = %e, "Failed to start watching plugin paths");
            return WatchStatus::Failed(e.into());
        }

        let listener = tokio::spawn(listen(Arc::downgrade(&self.inner), receiver));
        let status = WatchStatus::Started {
            plugins: watched.len(),
            paths: paths.len(),
        };

        let mut session = self.inner.session.lock();
        session.active = true;
        session.plugins = watched;
        session.listener = Some(listener);
        info!(plugins = session.plugins.len(), paths = paths.len(), "Watching plugins for changes");

        status
    }

    /// Cancel pending reloads and stop the native watcher. Idempotent.
    pub async fn stop_watching(&self) {
        let (was_active, listener) = {
            let mut session = self.inner.session.lock();
            let was_active = session.active;
            session.active = false;
            session.plugins.clear();
            (was_active, session.listener.take())
        };

        if let Some(listener) = listener {
            listener.abort();
        }
        let cancelled = self.cancel_pending();

        if was_active {
            let limit = self.config().native_timeout();
            if let Err(e) = bounded("watch_stop", limit, self.inner.watch.watch_stop()).await {
                warn!(error = %e, "Failed to stop native watcher");
            }
            info!(cancelled, "Stopped watching plugins");
        }
    }

    fn cancel_pending(&self) -> usize {
        let drained: Vec<(String, PendingTimer)> = self.inner.timers.lock().drain().collect();
        let mut phases = self.inner.phases.lock();
        for (plugin_id, timer) in &drained {
            timer.handle.abort();
            if phases.get(plugin_id) == Some(&ReloadPhase::PendingReload) {
                phases.insert(plugin_id.clone(), ReloadPhase::Idle);
            }
        }
        drained.len()
    }

    /// Route one change notification. Returns the plugin id it resolved to.
    pub fn handle_file_change(&self, event: &FileChangeEvent) -> Option<String> {
        let resolved = {
            let session = self.inner.session.lock();
            if !session.active {
                return None;
            }
            resolve_plugin_id(&event.path, &session.plugins)
        };

        let Some(plugin_id) = resolved else {
            debug!(path = %event.path.display(), "Change outside watched plugins");
            return None;
        };

        debug!(plugin_id = %plugin_id, kind = ?event.kind, path = %event.path.display(), "Plugin file changed");
        if self.inner.config.read().auto_reload {
            self.schedule_reload(&plugin_id);
        }
        Some(plugin_id)
    }

    /// Arm (or re-arm) the debounce timer for `plugin_id`.
    fn schedule_reload(&self, plugin_id: &str) {
        let debounce = self.inner.config.read().debounce();
        let generation = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(&self.inner);
        let id = plugin_id.to_string();

        // Held across spawn so the timer cannot look itself up before insertion.
        let mut timers = self.inner.timers.lock();
        if let Some(previous) = timers.remove(plugin_id) {
            previous.handle.abort();
            debug!(plugin_id, "Debounce timer re-armed");
        }

        let handle = tokio::spawn({
            let id = id.clone();
            async move {
                tokio::time::sleep(debounce).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                {
                    // Superseded timers were aborted; this guards the race with re-arming.
                    let mut timers = inner.timers.lock();
                    let current = timers
                        .get(&id)
                        .is_some_and(|timer| timer.generation == generation);
                    if !current {
                        return;
                    }
                    timers.remove(&id);
                }
                HotReloadManager { inner }.reload_plugin(&id).await;
            }
        });
        timers.insert(id, PendingTimer { generation, handle });
        drop(timers);

        let mut phases = self.inner.phases.lock();
        let phase = phases.entry(plugin_id.to_string()).or_default();
        if *phase != ReloadPhase::Reloading {
            *phase = ReloadPhase::PendingReload;
        }
    }

    // ------------------------------------------------------------------
    // Reloading
    // ------------------------------------------------------------------

    /// Reload one plugin: capture state, invalidate caches, load and swap,
    /// restore state. Failures end up in the returned result, never as `Err`.
    pub async fn reload_plugin(&self, plugin_id: &str) -> ReloadResult {
        let guard = self.inner.locks.acquire(plugin_id, OperationKind::Reload).await;
        self.inner
            .phases
            .lock()
            .insert(plugin_id.to_string(), ReloadPhase::Reloading);

        let config = self.config();
        let limit = config.native_timeout();
        let started = Instant::now();
        info!(plugin_id, "Reloading plugin");

        self.run_hook(plugin_id, &Hook::BeforeReload).await;

        if config.preserve_state {
            self.inner
                .state
                .capture(
                    plugin_id,
                    self.inner.storage.as_ref(),
                    self.inner.module.as_ref(),
                    limit,
                )
                .await;
        }

        if let Err(e) = bounded(
            "invalidate_cache",
            limit,
            self.inner.module.invalidate_cache(plugin_id),
        )
        .await
        {
            warn!(plugin_id, error = %e, "Cache invalidation failed");
        }

        let outcome = self.load_and_swap(plugin_id, limit).await;

        let preserved_state = match (&outcome, config.preserve_state) {
            (Ok(()), true) => self
                .inner
                .state
                .restore(
                    plugin_id,
                    self.inner.storage.as_ref(),
                    self.inner.module.as_ref(),
                    limit,
                )
                .await
                .filter(|snapshot| !snapshot.is_empty()),
            _ => None,
        };

        let result = ReloadResult {
            plugin_id: plugin_id.to_string(),
            success: outcome.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: outcome.err().map(|e| e.to_string()),
            preserved_state,
            timestamp: Utc::now(),
        };

        match &result.error {
            None => info!(plugin_id, duration_ms = result.duration_ms, "Plugin reloaded"),
            Some(e) => error!(plugin_id, error = %e, "Plugin reload failed"),
        }

        self.record(&result, config.history_limit);
        drop(guard);

        self.run_hook(plugin_id, &Hook::AfterReload {
            success: result.success,
        })
        .await;
        self.publish(&result);
        self.notify(&result);

        result
    }

    /// Reload every watched plugin in turn.
    pub async fn reload_all(&self) -> Vec<ReloadResult> {
        let mut results = Vec::new();
        for plugin_id in self.watched_plugins() {
            results.push(self.reload_plugin(&plugin_id).await);
        }
        results
    }

    async fn load_and_swap(&self, plugin_id: &str, limit: Duration) -> Result<(), ReloadError> {
        let Some(loader) = &self.inner.loader else {
            return bounded("reload", limit, self.inner.module.reload(plugin_id))
                .await
                .map_err(ReloadError::from);
        };

        let swap = async {
            loader.load(plugin_id).await?;
            loader.reload(plugin_id).await
        };

        match tokio::time::timeout(limit, AssertUnwindSafe(swap).catch_unwind()).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ReloadError::Loader(format!("{e:#}"))),
            Ok(Err(panic)) => Err(ReloadError::Loader(format!(
                "panicked: {}",
                panic_message(&*panic)
            ))),
            Err(_) => Err(ReloadError::Timeout(limit.as_millis() as u64)),
        }
    }

    async fn run_hook(&self, plugin_id: &str, hook: &Hook) {
        let Some(hooks) = &self.inner.hooks else {
            return;
        };
        match hooks.execute_for(plugin_id, hook).await {
            Ok(()) | Err(PluginError::NotFound(_)) => {}
            Err(e) => warn!(plugin_id, error = %e, "Reload hook failed"),
        }
    }

    fn record(&self, result: &ReloadResult, limit: usize) {
        {
            let mut history = self.inner.history.lock();
            history.push_back(result.clone());
            while history.len() > limit {
                history.pop_front();
            }
        }

        let pending = self.inner.timers.lock().contains_key(&result.plugin_id);
        let phase = match (pending, result.success) {
            (true, _) => ReloadPhase::PendingReload,
            (false, true) => ReloadPhase::Idle,
            (false, false) => ReloadPhase::Failed,
        };
        self.inner
            .phases
            .lock()
            .insert(result.plugin_id.clone(), phase);
    }

    fn publish(&self, result: &ReloadResult) {
        let Some(bus) = &self.inner.bus else {
            return;
        };
        let event_type = if result.success {
            EVENT_RELOADED
        } else {
            EVENT_RELOAD_FAILED
        };
        match serde_json::to_value(result) {
            Ok(payload) => {
                bus.emit(event_type, payload, EventSource::system(EVENT_SOURCE));
            }
            Err(e) => warn!(plugin_id = %result.plugin_id, error = %e, "Failed to encode reload event"),
        }
    }

    fn notify(&self, result: &ReloadResult) {
        let kind = if result.success {
            CallbackKind::Reload
        } else {
            CallbackKind::Error
        };
        let callbacks: Vec<(CallbackId, ReloadCallback)> = self
            .inner
            .callbacks
            .read()
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| (c.id, c.callback.clone()))
            .collect();

        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(result))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(callback = id.0, plugin_id = %result.plugin_id, "Reload callback failed: {e:#}"),
                Err(panic) => error!(
                    callback = id.0,
                    plugin_id = %result.plugin_id,
                    panic = %panic_message(&*panic),
                    "Reload callback panicked"
                ),
            }
        }
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    fn add_callback(&self, kind: CallbackKind, callback: ReloadCallback) -> CallbackId {
        let id = CallbackId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.callbacks.write().push(RegisteredCallback { id, kind, callback });
        id
    }

    /// Called after every successful reload.
    pub fn on_reload<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&ReloadResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_callback(CallbackKind::Reload, Arc::new(callback))
    }

    /// Called after every failed reload.
    pub fn on_error<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&ReloadResult) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_callback(CallbackKind::Error, Arc::new(callback))
    }

    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.inner.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|c| c.id != id);
        callbacks.len() != before
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Reload results, oldest first.
    pub fn history(&self) -> Vec<ReloadResult> {
        self.inner.history.lock().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    pub fn last_result(&self, plugin_id: &str) -> Option<ReloadResult> {
        self.inner
            .history
            .lock()
            .iter()
            .rev()
            .find(|r| r.plugin_id == plugin_id)
            .cloned()
    }

    pub fn is_watching(&self) -> bool {
        self.inner.session.lock().active
    }

    pub fn watched_plugins(&self) -> Vec<String> {
        self.inner
            .session
            .lock()
            .plugins
            .iter()
            .map(|p| p.id.clone())
            .collect()
    }

    /// Plugin ids with an armed debounce timer, sorted.
    pub fn pending_reloads(&self) -> Vec<String> {
        let mut pending: Vec<String> = self.inner.timers.lock().keys().cloned().collect();
        pending.sort();
        pending
    }

    pub fn plugin_phase(&self, plugin_id: &str) -> ReloadPhase {
        self.inner
            .phases
            .lock()
            .get(plugin_id)
            .copied()
            .unwrap_or_default()
    }

    /// Whether a captured snapshot is still held for `plugin_id`.
    pub async fn has_preserved_state(&self, plugin_id: &str) -> bool {
        self.inner.state.contains(plugin_id).await
    }
}

impl fmt::Debug for HotReloadManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotReloadManager")
            .field("watching", &self.is_watching())
            .field("watched_plugins", &self.watched_plugins())
            .field("pending_reloads", &self.pending_reloads())
            .finish()
    }
}

async fn listen(inner: Weak<Inner>, mut receiver: broadcast::Receiver<FileChangeEvent>) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                HotReloadManager { inner }.handle_file_change(&event);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "File change listener lagged, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("File change listener finished");
}

static DEFAULT_HOT_RELOAD: GlobalSlot<HotReloadManager> = GlobalSlot::new();

/// Make `manager` the process-wide default.
pub fn install_default_hot_reload(manager: HotReloadManager) {
    DEFAULT_HOT_RELOAD.install(Arc::new(manager));
}

/// Process-wide default manager, if one was installed.
pub fn default_hot_reload() -> Option<Arc<HotReloadManager>> {
    DEFAULT_HOT_RELOAD.get()
}

/// Drop the process-wide default manager.
pub fn reset_default_hot_reload() {
    DEFAULT_HOT_RELOAD.reset();
}
