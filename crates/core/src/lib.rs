//! Mirai API core
//!
//! The process-wide core every plugin and subsystem goes through: the content
//! and command registries, the shared task scheduler, and the identity and
//! directory facts of the running server.
//!
//! ```no_run
//! use mirai_api::{CoreConfig, ServerCore};
//!
//! # fn main() -> Result<(), mirai_api::CoreError> {
//! let core = ServerCore::builder()
//!     .config(CoreConfig::load_from_file("mirai.toml")?)
//!     .init_logging(true)
//!     .build()?;
//!
//! let handle = core.scheduler().submit(|| Ok(2 + 2))?;
//! assert_eq!(handle.join()?, 4);
//!
//! core.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod permissions;
pub mod plugin;
pub mod registry;
pub mod scheduler;
pub mod server;

pub use config::{CoreConfig, LoggingConfig, SchedulerConfig, ServerSettings, ShutdownPolicy};
pub use error::CoreError;
pub use identifier::{Identifier, IdentifierError};
pub use permissions::{PermissionsError, PermissionsManager, UnimplementedPermissions};
pub use plugin::{Plugin, PluginContext, PluginId, PluginInfo, PurgeReport};
pub use registry::{
    CommandContext, CommandEntry, CommandError, CommandOutcome, CommandRegistry, CommandSender, CommandSpec,
    ContentDefinition, ContentKind, GameRegistry, RegistryError,
};
pub use scheduler::{OwnedScheduler, SchedulerError, SchedulerStats, TaskError, TaskHandle, TaskState, TaskScheduler};
pub use server::{CoreHandle, Directories, RunMode, ServerCore, ServerCoreBuilder, ServerIdentity};
