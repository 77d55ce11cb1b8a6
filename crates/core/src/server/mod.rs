//! Server core facade
//!
//! [`ServerCore`] owns the two registries, the task scheduler and the identity
//! facts of the process. It is built once, before any plugin code runs, and
//! passed by reference (or through a [`CoreHandle`]) to every collaborator.

mod identity;

pub use identity::{
    console_advanced_for, Directories, RunMode, ServerIdentity, BUILD_DESCRIBE, GAME_VERSION, PROTOCOL_VERSION,
};

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::logging;
use crate::permissions::{PermissionsManager, UnimplementedPermissions};
use crate::plugin::{Plugin, PluginContext, PluginId, PluginInfo, PurgeReport};
use crate::registry::{CommandRegistry, GameRegistry};
use crate::scheduler::TaskScheduler;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Builder running the one-time construction sequence
pub struct ServerCoreBuilder {
    config: CoreConfig,
    root_dir: Option<PathBuf>,
    permissions: Option<Arc<dyn PermissionsManager>>,
    init_logging: bool,
}

impl ServerCoreBuilder {
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
            root_dir: None,
            permissions: None,
            init_logging: false,
        }
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the root directory from the configuration
    pub fn root_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(root.into());
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionsManager>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Install the global tracing subscriber as the first step of `build`
    pub fn init_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    /// Identity and directories, then registries, then the scheduler
    pub fn build(self) -> Result<Arc<ServerCore>, CoreError> {
        self.config.validate()?;

        let identity = ServerIdentity::detect()?;
        if self.init_logging {
            logging::init(&self.config.logging, identity.console_advanced())?;
        }

        info!(
            "Starting server core v{} ({}) for Minecraft {} (protocol {})",
            identity.version(),
            identity.build(),
            identity.game_version(),
            identity.protocol_version()
        );

        let directories = Directories::resolve(&self.config.server, self.root_dir.as_deref())?;
        if self.config.server.create_directories {
            directories.create_all()?;
        }
        info!("Server root: {}", directories.root.display());

        let game_registry = GameRegistry::new();
        let command_registry = CommandRegistry::new();
        info!("Registries initialized");

        let scheduler = TaskScheduler::new(&self.config.scheduler)?;

        let permissions = self
            .permissions
            .unwrap_or_else(|| Arc::new(UnimplementedPermissions) as Arc<dyn PermissionsManager>);

        info!("Server core initialized");
        Ok(Arc::new(ServerCore {
            identity,
            directories,
            config: self.config,
            game_registry,
            command_registry,
            scheduler,
            permissions,
            plugins: DashMap::new(),
        }))
    }
}

impl Default for ServerCoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide entry point to registries, scheduler and identity
pub struct ServerCore {
    identity: ServerIdentity,
    directories: Directories,
    config: CoreConfig,
    game_registry: GameRegistry,
    command_registry: CommandRegistry,
    scheduler: TaskScheduler,
    permissions: Arc<dyn PermissionsManager>,
    plugins: DashMap<PluginId, PluginInfo>,
}

impl ServerCore {
    pub fn builder() -> ServerCoreBuilder {
        ServerCoreBuilder::new()
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn directories(&self) -> &Directories {
        &self.directories
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn game_registry(&self) -> &GameRegistry {
        &self.game_registry
    }

    pub fn command_registry(&self) -> &CommandRegistry {
        &self.command_registry
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Permissions boundary; the default manager fails every query
    pub fn permissions(&self) -> &dyn PermissionsManager {
        self.permissions.as_ref()
    }

    /// Enable `plugin`, purging its registrations again if `on_enable` fails
    pub fn enable_plugin(&self, plugin: &dyn Plugin) -> Result<PluginId, CoreError> {
        let info = plugin.info();
        let id = info.id()?;

        match self.plugins.entry(id.clone()) {
            Entry::Occupied(_) => return Err(CoreError::PluginAlreadyEnabled(id)),
            Entry::Vacant(slot) => {
                slot.insert(info.clone());
            }
        }

        let ctx = PluginContext::new(self, id.clone());
        if let Err(e) = plugin.on_enable(&ctx) {
            let report = self.unload_plugin(&id);
            warn!(
                "Plugin '{}' failed to enable, rolled back {} content, {} commands, {} tasks: {:#}",
                id,
                report.content.len(),
                report.commands.len(),
                report.tasks_cancelled,
                e
            );
            return Err(CoreError::PluginEnable {
                plugin: id,
                message: format!("{:#}", e),
            });
        }

        info!("Enabled plugin '{}' v{}", info.name, info.version);
        Ok(id)
    }

    /// Call `on_disable`, then purge everything the plugin contributed
    ///
    /// The purge happens even when `on_disable` fails.
    pub fn disable_plugin(&self, plugin: &dyn Plugin) -> Result<PurgeReport, CoreError> {
        let id = plugin.info().id()?;
        if !self.plugins.contains_key(&id) {
            return Err(CoreError::PluginNotEnabled(id));
        }

        let ctx = PluginContext::new(self, id.clone());
        if let Err(e) = plugin.on_disable(&ctx) {
            warn!("Plugin '{}' failed to disable cleanly: {:#}", id, e);
        }

        Ok(self.unload_plugin(&id))
    }

    /// Remove all content and commands owned by `owner` and cancel its tasks
    pub fn unload_plugin(&self, owner: &PluginId) -> PurgeReport {
        let content = self.game_registry.unregister_all(owner);
        let commands = self.command_registry.unregister_all(owner);
        let tasks_cancelled = self.scheduler.cancel_owned(owner);
        self.plugins.remove(owner);

        let report = PurgeReport {
            owner: owner.clone(),
            content,
            commands,
            tasks_cancelled,
        };
        if !report.is_empty() {
            info!(
                "Unloaded plugin '{}': {} content, {} commands, {} tasks",
                owner,
                report.content.len(),
                report.commands.len(),
                report.tasks_cancelled
            );
        }
        report
    }

    pub fn is_plugin_enabled(&self, id: &PluginId) -> bool {
        self.plugins.contains_key(id)
    }

    pub fn enabled_plugins(&self) -> Vec<PluginInfo> {
        let mut plugins: Vec<PluginInfo> = self.plugins.iter().map(|entry| entry.value().clone()).collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));
        plugins
    }

    /// Stop the scheduler; registries stay readable
    pub fn shutdown(&self) {
        info!("Shutting down server core after {:?}", self.identity.uptime());
        self.scheduler.shutdown();
    }
}

/// Late-bound reference to the server core
///
/// Handed to collaborators constructed before the core exists. Filled exactly
/// once; reads before that fail with [`CoreError::NotInitialized`].
#[derive(Clone, Default)]
pub struct CoreHandle {
    slot: Arc<OnceLock<Arc<ServerCore>>>,
}

impl CoreHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, core: Arc<ServerCore>) -> Result<(), CoreError> {
        self.slot.set(core).map_err(|_| CoreError::AlreadyInitialized)
    }

    pub fn get(&self) -> Result<Arc<ServerCore>, CoreError> {
        self.slot.get().cloned().ok_or(CoreError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::registry::{CommandContext, CommandOutcome, CommandSender, CommandSpec, ContentDefinition, ContentKind};
    use std::time::Duration;

    fn test_core() -> (tempfile::TempDir, Arc<ServerCore>) {
        let temp = tempfile::tempdir().unwrap();
        let config = CoreConfig {
            scheduler: SchedulerConfig {
                worker_threads: 2,
                ..SchedulerConfig::default()
            },
            ..CoreConfig::default()
        };
        let core = ServerCore::builder().config(config).root_dir(temp.path()).build().unwrap();
        (temp, core)
    }

    fn bloom(_ctx: &mut CommandContext) -> anyhow::Result<CommandOutcome> {
        Ok(CommandOutcome::Success)
    }

    struct Flowers;

    impl Plugin for Flowers {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("Flowers", semver::Version::new(0, 1, 0))
        }

        fn on_enable(&self, ctx: &PluginContext<'_>) -> anyhow::Result<()> {
            ctx.register_content("flowers:rose", ContentDefinition::new(ContentKind::Block, "Rose"))?;
            ctx.register_command(CommandSpec::new("bloom", bloom))?;
            ctx.scheduler().submit_periodic(|| Ok(()), Duration::from_secs(60), Duration::from_secs(60))?;
            Ok(())
        }
    }

    struct Broken;

    impl Plugin for Broken {
        fn info(&self) -> PluginInfo {
            PluginInfo::new("Broken", semver::Version::new(0, 0, 1))
        }

        fn on_enable(&self, ctx: &PluginContext<'_>) -> anyhow::Result<()> {
            ctx.register_content("broken:thing", ContentDefinition::new(ContentKind::Item, "Thing"))?;
            anyhow::bail!("missing config")
        }
    }

    #[test]
    fn test_build_creates_directories() {
        let (temp, core) = test_core();
        assert_eq!(core.directories().root, temp.path());
        assert!(temp.path().join("plugins").is_dir());
        assert!(temp.path().join("worlds").is_dir());
        assert!(core.identity().is_server());
        assert_eq!(core.scheduler().worker_count(), 2);
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = CoreConfig::default();
        config.logging.level = "nonsense".to_string();
        assert!(matches!(
            ServerCore::builder().config(config).build(),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn test_enable_and_unload_plugin() {
        let (_temp, core) = test_core();
        let id = core.enable_plugin(&Flowers).unwrap();

        assert!(core.is_plugin_enabled(&id));
        assert!(core.game_registry().lookup_str("flowers:rose").is_some());
        assert!(core.command_registry().is_registered("bloom"));
        assert!(matches!(
            core.enable_plugin(&Flowers),
            Err(CoreError::PluginAlreadyEnabled(_))
        ));

        let report = core.disable_plugin(&Flowers).unwrap();
        assert_eq!(report.content.len(), 1);
        assert_eq!(report.commands, vec!["bloom".to_string()]);
        assert_eq!(report.tasks_cancelled, 1);
        assert!(!core.is_plugin_enabled(&id));
        assert!(core.game_registry().lookup_str("flowers:rose").is_none());
        assert!(matches!(
            core.disable_plugin(&Flowers),
            Err(CoreError::PluginNotEnabled(_))
        ));
    }

    #[test]
    fn test_failed_enable_rolls_back() {
        let (_temp, core) = test_core();
        let err = core.enable_plugin(&Broken).unwrap_err();

        assert!(matches!(err, CoreError::PluginEnable { .. }));
        assert!(core.game_registry().lookup_str("broken:thing").is_none());
        assert!(core.enabled_plugins().is_empty());
    }

    #[test]
    fn test_permissions_not_implemented() {
        let (_temp, core) = test_core();
        let err: CoreError = core
            .permissions()
            .has_permission(&CommandSender::Console, "mirai.command.stop")
            .unwrap_err()
            .into();
        assert!(err.is_not_implemented());
    }

    #[test]
    fn test_core_handle() {
        let handle = CoreHandle::new();
        assert!(matches!(handle.get(), Err(CoreError::NotInitialized)));

        let (_temp, core) = test_core();
        let shared = handle.clone();
        handle.install(Arc::clone(&core)).unwrap();

        assert!(shared.is_initialized());
        assert!(Arc::ptr_eq(&shared.get().unwrap(), &core));
        assert!(matches!(handle.install(core), Err(CoreError::AlreadyInitialized)));
    }

    #[test]
    fn test_shutdown_stops_scheduler() {
        let (_temp, core) = test_core();
        core.shutdown();
        assert!(core.scheduler().is_shutdown());
        assert!(core.scheduler().submit(|| Ok(())).is_err());
        assert_eq!(core.command_registry().len(), 0);
    }
}
