//! Top-level error type of the server core

use crate::config::ConfigError;
use crate::logging::LoggingError;
use crate::permissions::PermissionsError;
use crate::plugin::{InvalidPluginId, PluginId};
use crate::registry::{CommandError, RegistryError};
use crate::scheduler::{SchedulerError, TaskError};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Server core accessed before initialization completed")]
    NotInitialized,

    #[error("Server core is already initialized")]
    AlreadyInitialized,

    #[error("Failed to prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugin '{0}' is already enabled")]
    PluginAlreadyEnabled(PluginId),

    #[error("Plugin '{0}' is not enabled")]
    PluginNotEnabled(PluginId),

    #[error("Plugin '{plugin}' failed to enable: {message}")]
    PluginEnable { plugin: PluginId, message: String },

    #[error(transparent)]
    InvalidPluginId(#[from] InvalidPluginId),

    #[error("Invalid version: {0}")]
    Version(#[from] semver::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Permissions(#[from] PermissionsError),
}

impl CoreError {
    /// True for errors raised by the unimplemented permissions boundary
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::Permissions(PermissionsError::NotImplemented(_)))
    }
}
