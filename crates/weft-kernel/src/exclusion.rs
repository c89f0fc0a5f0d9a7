//! Per-plugin operation exclusion
//!
//! Reload, update and rollback of the same plugin must never interleave.
//! Each manager acquires an [`OperationGuard`] for the plugin id before
//! touching it; a second acquirer for the same id waits until the first
//! guard is dropped. Different ids never contend.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Operation holding a plugin id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Reload,
    Update,
    Rollback,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reload => "reload",
            Self::Update => "update",
            Self::Rollback => "rollback",
        })
    }
}

#[derive(Default)]
struct Slot {
    gate: Arc<AsyncMutex<()>>,
    holder: Mutex<Option<OperationKind>>,
}

type SlotMap = Mutex<HashMap<String, Arc<Slot>>>;

/// In-flight markers keyed by plugin id
///
/// A slot lives only while a guard holds it or an acquirer waits on it.
#[derive(Default)]
pub struct PluginLocks {
    slots: Arc<SlotMap>,
}

impl PluginLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, plugin_id: &str) -> Arc<Slot> {
        self.slots
            .lock()
            .entry(plugin_id.to_string())
            .or_default()
            .clone()
    }

    /// Wait until `plugin_id` is free, then mark it as held by `kind`.
    pub async fn acquire(&self, plugin_id: &str, kind: OperationKind) -> OperationGuard {
        let slot = self.slot(plugin_id);
        if let Some(current) = *slot.holder.lock() {
            trace!(plugin_id, waiting = %kind, held_by = %current, "Queued behind in-flight operation");
        }

        let permit = slot.gate.clone().lock_owned().await;
        *slot.holder.lock() = Some(kind);
        OperationGuard {
            plugin_id: plugin_id.to_string(),
            kind,
            slot,
            slots: self.slots.clone(),
            _permit: permit,
        }
    }

    /// Mark `plugin_id` as held by `kind` if it is free right now.
    pub fn try_acquire(&self, plugin_id: &str, kind: OperationKind) -> Option<OperationGuard> {
        let slot = self.slot(plugin_id);
        let permit = slot.gate.clone().try_lock_owned().ok()?;
        *slot.holder.lock() = Some(kind);
        Some(OperationGuard {
            plugin_id: plugin_id.to_string(),
            kind,
            slot,
            slots: self.slots.clone(),
            _permit: permit,
        })
    }

    /// Operation currently holding `plugin_id`.
    pub fn in_flight(&self, plugin_id: &str) -> Option<OperationKind> {
        let slot = self.slots.lock().get(plugin_id).cloned()?;
        let holder = *slot.holder.lock();
        holder
    }
}

impl fmt::Debug for PluginLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let held: HashMap<String, OperationKind> = self
            .slots
            .lock()
            .iter()
            .filter_map(|(id, slot)| (*slot.holder.lock()).map(|kind| (id.clone(), kind)))
            .collect();
        f.debug_struct("PluginLocks").field("in_flight", &held).finish()
    }
}

/// Held while an operation runs on one plugin; releases the id on drop.
pub struct OperationGuard {
    plugin_id: String,
    kind: OperationKind,
    slot: Arc<Slot>,
    slots: Arc<SlotMap>,
    _permit: OwnedMutexGuard<()>,
}

impl OperationGuard {
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        // Cleared before the permit is released so the next holder's mark sticks.
        *self.slot.holder.lock() = None;

        // Clones are only taken under the map lock, so a count of two (the
        // map's and ours) means nobody is queued on this slot.
        let mut slots = self.slots.lock();
        if Arc::strong_count(&self.slot) == 2
            && slots
                .get(&self.plugin_id)
                .is_some_and(|slot| Arc::ptr_eq(slot, &self.slot))
        {
            slots.remove(&self.plugin_id);
        }
    }
}

impl fmt::Debug for OperationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationGuard")
            .field("plugin_id", &self.plugin_id)
            .field("kind", &self.kind)
            .finish()
    }
}
