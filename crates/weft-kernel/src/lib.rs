//! Weft kernel
//!
//! Leaf contracts shared by the plugin runtime:
//! - typed pub/sub message bus with pattern, priority and filter semantics
//! - plugin descriptors and the closed hook set
//! - native host boundary (watch, reload, state, install/restore, storage, marketplace)
//! - configuration types and the file loader
//! - per-plugin operation exclusion

// bus module
pub mod bus;
pub use bus::*;

// plugin module
pub mod plugin;

// host boundary
pub mod host;

// configuration
pub mod config;

// per-plugin in-flight markers
pub mod exclusion;

// process-wide default slots
pub mod global;

pub use exclusion::{OperationGuard, OperationKind, PluginLocks};
pub use global::GlobalSlot;
