//! Lifecycle errors

use thiserror::Error;
use weft_kernel::host::HostError;

/// Errors raised by update, rollback and backup operations.
///
/// Update and rollback operations report these through the `error` field of
/// their result structs. Configuration, migration registration, plans and
/// backups return them as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No pending update found")]
    NoPendingUpdate,

    #[error("Invalid version {version}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Plugin not tracked: {0}")]
    NotTracked(String),

    #[error("No previous versions retained for {0}")]
    NothingToRollBack(String),

    #[error("Version {version} of {plugin_id} is not retained")]
    VersionNotRetained { plugin_id: String, version: String },

    #[error("Version {version} is already installed")]
    AlreadyInstalled { version: String },

    #[error("Migration {from} -> {to} failed: {message}")]
    MigrationFailed {
        from: String,
        to: String,
        message: String,
    },

    #[error("No tokio runtime to run the auto-update schedule: {0}")]
    NoRuntime(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error(transparent)]
    Host(#[from] HostError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
