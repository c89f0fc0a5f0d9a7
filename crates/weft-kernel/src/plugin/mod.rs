//! Plugin descriptors and lifecycle hooks

pub mod error;
pub mod hooks;

pub use error::PluginError;
pub use hooks::{Hook, HookKind, HookOutcome, HookRegistry, PluginHooks, dispatch, panic_message};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Plugin result type using the typed [`PluginError`].
pub type PluginResult<T> = Result<T, PluginError>;

/// Where a plugin was installed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginSource {
    /// Checked out for development
    Dev,
    /// Installed from a local directory or archive
    Local,
    Marketplace,
    /// Shipped with the host
    Builtin,
}

impl PluginSource {
    /// Sources whose files are edited in place and therefore watched.
    pub fn is_watchable(self) -> bool {
        matches!(self, Self::Dev | Self::Local)
    }
}

/// Identity and location of one installed plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub source: PluginSource,
    /// Root directory of the plugin's files, when known
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<String>, version: impl Into<String>, source: PluginSource) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            source,
            path: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Root path to watch, for dev/local plugins that have one.
    pub fn watch_path(&self) -> Option<&PathBuf> {
        if self.source.is_watchable() {
            self.path.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_path_only_for_dev_and_local() {
        let dev = PluginDescriptor::new("notes", "1.0.0", PluginSource::Dev).with_path("/p/notes");
        let local = PluginDescriptor::new("tasks", "1.0.0", PluginSource::Local).with_path("/p/tasks");
        let market = PluginDescriptor::new("theme", "2.0.0", PluginSource::Marketplace).with_path("/p/theme");
        let bare = PluginDescriptor::new("bare", "0.1.0", PluginSource::Dev);

        assert_eq!(dev.watch_path(), Some(&PathBuf::from("/p/notes")));
        assert!(local.watch_path().is_some());
        assert!(market.watch_path().is_none());
        assert!(bare.watch_path().is_none());
        assert_eq!(dev.name, "notes");
    }

    #[test]
    fn test_descriptor_serde() {
        let json = r#"{"id":"notes","name":"Notes","version":"1.2.0","source":"marketplace"}"#;
        let descriptor: PluginDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.source, PluginSource::Marketplace);
        assert!(descriptor.path.is_none());
    }
}
