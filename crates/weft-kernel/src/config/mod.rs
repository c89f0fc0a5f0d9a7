//! Runtime configuration
//!
//! Typed settings for the bus, hot reload and auto-update, plus a loader that
//! reads them from YAML, TOML or JSON with environment variable substitution
//! (`${VAR}` and `$VAR` syntax).

#[cfg(feature = "config")]
mod loader;

#[cfg(feature = "config")]
pub use loader::{ConfigError, ConfigResult, detect_format, from_str, load_config, load_merged, substitute_env_vars};
#[cfg(feature = "config")]
pub use ::config::FileFormat;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Message bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Events kept for `history` / `replay`
    pub history_limit: usize,
    /// How long `request` waits for a responder when no timeout is given
    pub request_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            request_timeout_ms: 30_000,
        }
    }
}

impl BusConfig {
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Hot-reload configuration
///
/// Mutable at runtime through the manager's `set_config`; turning `enabled`
/// off while watching stops the watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    pub enabled: bool,
    /// Extra paths watched in addition to dev/local plugin roots
    pub watch_paths: Vec<PathBuf>,
    /// Coalescing window for file-change bursts
    pub debounce_ms: u64,
    pub preserve_state: bool,
    /// Reload automatically when a watched plugin changes
    pub auto_reload: bool,
    /// Reload results kept in history
    pub history_limit: usize,
    /// Upper bound on any single native call
    pub native_timeout_ms: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            watch_paths: Vec::new(),
            debounce_ms: 300,
            preserve_state: true,
            auto_reload: true,
            history_limit: 100,
            native_timeout_ms: 30_000,
        }
    }
}

impl HotReloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_watch_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.watch_paths.push(path.into());
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn with_preserve_state(mut self, enabled: bool) -> Self {
        self.preserve_state = enabled;
        self
    }

    pub fn with_auto_reload(mut self, enabled: bool) -> Self {
        self.auto_reload = enabled;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_native_timeout(mut self, timeout: Duration) -> Self {
        self.native_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn native_timeout(&self) -> Duration {
        Duration::from_millis(self.native_timeout_ms)
    }
}

/// Auto-update configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoUpdateConfig {
    pub enabled: bool,
    pub check_interval_secs: u64,
    /// Install found updates immediately
    pub auto_install: bool,
    /// Record and announce updates but never install them
    pub notify_only: bool,
    pub exclude_plugins: Vec<String>,
    pub allow_prerelease: bool,
}

impl Default for AutoUpdateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_secs: 24 * 60 * 60,
            auto_install: false,
            notify_only: true,
            exclude_plugins: Vec::new(),
            allow_prerelease: false,
        }
    }
}

impl AutoUpdateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_secs = interval.as_secs();
        self
    }

    pub fn with_auto_install(mut self, enabled: bool) -> Self {
        self.auto_install = enabled;
        self
    }

    pub fn with_notify_only(mut self, enabled: bool) -> Self {
        self.notify_only = enabled;
        self
    }

    pub fn with_excluded(mut self, plugin_id: impl Into<String>) -> Self {
        self.exclude_plugins.push(plugin_id.into());
        self
    }

    pub fn with_allow_prerelease(mut self, enabled: bool) -> Self {
        self.allow_prerelease = enabled;
        self
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn is_excluded(&self, plugin_id: &str) -> bool {
        self.exclude_plugins.iter().any(|p| p == plugin_id)
    }

    /// Whether found updates should be installed without user action.
    pub fn installs_automatically(&self) -> bool {
        self.auto_install && !self.notify_only
    }
}

/// Top-level configuration file layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub bus: BusConfig,
    pub hot_reload: HotReloadConfig,
    pub auto_update: AutoUpdateConfig,
}
