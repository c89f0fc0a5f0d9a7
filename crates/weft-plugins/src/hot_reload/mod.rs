//! Hot-reload plugin support module
//!
//! Provides hot-reload capabilities for plugins:
//! - File watching for dev/local plugin sources
//! - Per-plugin debounce of change bursts
//! - State preservation across a reload
//! - Reload history and result callbacks

mod manager;
mod state;
mod watcher;

pub use manager::{
    CallbackId, HotReloadBuilder, HotReloadManager, PluginLoader, ReloadError, ReloadPhase,
    ReloadResult, WatchStatus, default_hot_reload, install_default_hot_reload,
    reset_default_hot_reload,
};
pub use state::{StateManager, StateSnapshot};
pub use watcher::{
    NotifyWatchHost, WatchedPlugin, resolve_plugin_id, should_ignore_path, translate_event,
};

/// Bus event emitted after a successful reload
pub const EVENT_RELOADED: &str = "plugin:reloaded";
/// Bus event emitted after a failed reload
pub const EVENT_RELOAD_FAILED: &str = "plugin:reload-failed";
/// Bus source id used for reload notifications
pub const EVENT_SOURCE: &str = "hot-reload";
