//! Installed-version ledger
//!
//! Remembers which versions of each plugin have been installed and which one
//! is current. Rollback targets are the retained versions other than the
//! current one.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// One install of one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    pub version: String,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerEntry {
    current: String,
    /// Oldest first
    installs: Vec<InstalledVersion>,
}

#[derive(Debug, Default)]
pub struct VersionLedger {
    entries: RwLock<HashMap<String, LedgerEntry>>,
}

impl VersionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `version` is now installed and current.
    pub fn record_install(&self, plugin_id: &str, version: &str) {
        let mut entries = self.entries.write();
        let entry = entries.entry(plugin_id.to_string()).or_default();
        entry.current = version.to_string();
        entry.installs.push(InstalledVersion {
            version: version.to_string(),
            installed_at: Utc::now(),
        });
        debug!(plugin_id, version, "Recorded install");
    }

    pub fn current(&self, plugin_id: &str) -> Option<String> {
        self.entries
            .read()
            .get(plugin_id)
            .map(|entry| entry.current.clone())
    }

    pub fn is_tracked(&self, plugin_id: &str) -> bool {
        self.entries.read().contains_key(plugin_id)
    }

    /// Install events, oldest first.
    pub fn history(&self, plugin_id: &str) -> Vec<InstalledVersion> {
        self.entries
            .read()
            .get(plugin_id)
            .map(|entry| entry.installs.clone())
            .unwrap_or_default()
    }

    /// Distinct previously installed versions, most recently installed first,
    /// excluding the current one.
    pub fn retained_versions(&self, plugin_id: &str) -> Vec<String> {
        let entries = self.entries.read();
        let Some(entry) = entries.get(plugin_id) else {
            return Vec::new();
        };

        let mut retained: Vec<String> = Vec::new();
        for install in entry.installs.iter().rev() {
            if install.version != entry.current && !retained.contains(&install.version) {
                retained.push(install.version.clone());
            }
        }
        retained
    }

    pub fn is_retained(&self, plugin_id: &str, version: &str) -> bool {
        self.retained_versions(plugin_id).iter().any(|v| v == version)
    }

    /// Tracked plugin ids, sorted.
    pub fn tracked(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn forget(&self, plugin_id: &str) -> bool {
        self.entries.write().remove(plugin_id).is_some()
    }
}
