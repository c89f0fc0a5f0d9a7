//! Typed errors for the plugin sub-system.

use thiserror::Error;

/// Errors raised by plugin hooks and descriptor handling.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// No plugin with this id is registered.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// A hook body returned an error.
    #[error("Hook {hook} failed for plugin {plugin_id}: {message}")]
    HookFailed {
        plugin_id: String,
        hook: &'static str,
        message: String,
    },

    /// A hook body panicked.
    #[error("Hook {hook} panicked for plugin {plugin_id}: {message}")]
    HookPanicked {
        plugin_id: String,
        hook: &'static str,
        message: String,
    },

    /// Descriptor is missing data the operation needs.
    #[error("Invalid plugin descriptor {plugin_id}: {reason}")]
    InvalidDescriptor { plugin_id: String, reason: String },

    /// A (de)serialization error surfaced during a plugin operation.
    #[error("Plugin serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Other(String),
}
