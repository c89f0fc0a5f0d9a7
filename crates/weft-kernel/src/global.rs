//! Process-wide default instances
//!
//! Services are plain constructible values; a [`GlobalSlot`] only holds the
//! instance the composition root chose to share. Tests call `reset` to start
//! from a clean slot.

use parking_lot::RwLock;
use std::sync::Arc;

pub struct GlobalSlot<T> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T> GlobalSlot<T> {
    pub const fn new() -> Self {
        Self {
            slot: parking_lot::const_rwlock(None),
        }
    }

    /// Current instance, if one was installed.
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.read().clone()
    }

    /// Current instance, building one with `init` when the slot is empty.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> Arc<T> {
        if let Some(existing) = self.get() {
            return existing;
        }

        let mut slot = self.slot.write();
        // Another caller may have filled the slot between the two locks.
        slot.get_or_insert_with(|| Arc::new(init())).clone()
    }

    /// Replace the instance, returning the previous one.
    pub fn install(&self, value: Arc<T>) -> Option<Arc<T>> {
        self.slot.write().replace(value)
    }

    /// Empty the slot, returning the instance it held.
    pub fn reset(&self) -> Option<Arc<T>> {
        self.slot.write().take()
    }
}

impl<T> Default for GlobalSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
