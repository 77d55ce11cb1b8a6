//! Registry of chat and console commands contributed by plugins

use super::{OwnerIndex, RegistryError};
use crate::plugin::PluginId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Who issued a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSender {
    Console,
    Player(String),
    Plugin(PluginId),
}

impl fmt::Display for CommandSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => write!(f, "console"),
            Self::Player(name) => write!(f, "player '{}'", name),
            Self::Plugin(id) => write!(f, "plugin '{}'", id),
        }
    }
}

/// Invocation state handed to a command handler
#[derive(Debug, Clone)]
pub struct CommandContext {
    sender: CommandSender,
    label: String,
    args: Vec<String>,
    output: Vec<String>,
}

impl CommandContext {
    pub fn new(sender: CommandSender, label: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            sender,
            label: label.into(),
            args,
            output: Vec::new(),
        }
    }

    pub fn sender(&self) -> &CommandSender {
        &self.sender
    }

    /// The name or alias the command was invoked with
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Queue a line of feedback for the sender
    pub fn reply(&mut self, message: impl Into<String>) {
        self.output.push(message.into());
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }
}

/// What a handler reports back after running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    /// Arguments were wrong; the caller should show the usage string
    Usage,
    Denied(String),
}

/// Executable part of a command
pub trait CommandHandler: Send + Sync {
    fn execute(&self, ctx: &mut CommandContext) -> anyhow::Result<CommandOutcome>;
}

impl<F> CommandHandler for F
where
    F: Fn(&mut CommandContext) -> anyhow::Result<CommandOutcome> + Send + Sync,
{
    fn execute(&self, ctx: &mut CommandContext) -> anyhow::Result<CommandOutcome> {
        self(ctx)
    }
}

/// Command description supplied by a plugin at registration time
pub struct CommandSpec {
    name: String,
    aliases: Vec<String>,
    description: String,
    usage: Option<String>,
    permission: Option<String>,
    handler: Arc<dyn CommandHandler>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, handler: impl CommandHandler + 'static) -> Self {
        Self {
            name: name.into(),
            usage: None,
            aliases: Vec::new(),
            description: String::new(),
            permission: None,
            handler: Arc::new(handler),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Usage line shown on bad arguments; defaults to `/<name>` once registered
    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    /// Permission node, recorded for listings only; nothing enforces it yet
    pub fn permission(mut self, node: impl Into<String>) -> Self {
        self.permission = Some(node.into());
        self
    }
}

/// A registered command with its owner and metadata
pub struct CommandEntry {
    name: String,
    aliases: Vec<String>,
    description: String,
    usage: String,
    permission: Option<String>,
    owner: PluginId,
    handler: Arc<dyn CommandHandler>,
}

impl CommandEntry {
    /// Normalized primary name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized aliases, without the primary name or duplicates
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn usage(&self) -> &str {
        &self.usage
    }

    pub fn permission(&self) -> Option<&str> {
        self.permission.as_deref()
    }

    /// Plugin that registered the command
    pub fn owner(&self) -> &PluginId {
        &self.owner
    }

    /// Primary name followed by every alias
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Run the handler, turning handler errors into [`CommandError::Failed`]
    pub fn execute(&self, ctx: &mut CommandContext) -> Result<CommandOutcome, CommandError> {
        debug!("{} issued /{} {:?}", ctx.sender(), self.name, ctx.args());

        self.handler.execute(ctx).map_err(|e| {
            error!("Command /{} from plugin '{}' failed: {:#}", self.name, self.owner, e);
            CommandError::Failed {
                command: self.name.clone(),
                message: format!("{:#}", e),
            }
        })
    }
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Feedback collected from a dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub outcome: CommandOutcome,
    pub output: Vec<String>,
}

/// Failures while dispatching a command line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Empty command line")]
    Empty,
    #[error("Unknown command '{0}'")]
    Unknown(String),
    #[error("Command /{command} failed: {message}")]
    Failed { command: String, message: String },
}

struct CommandTable {
    /// Primary name -> entry
    entries: HashMap<String, Arc<CommandEntry>>,
    /// Every name and alias -> primary name
    labels: HashMap<String, String>,
    owners: OwnerIndex<String>,
}

impl CommandTable {
    fn detach(&mut self, name: &str) -> Option<Arc<CommandEntry>> {
        let entry = self.entries.remove(name)?;
        for label in entry.labels() {
            self.labels.remove(label);
        }
        Some(entry)
    }
}

/// Registry of commands addressable by name or alias
///
/// Names and aliases share one label space: a label maps to at most one
/// command at any instant, and a registration whose name or any alias is
/// taken fails as a whole.
pub struct CommandRegistry {
    table: RwLock<CommandTable>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(CommandTable {
                entries: HashMap::new(),
                labels: HashMap::new(),
                owners: OwnerIndex::new(),
            }),
        }
    }

    pub fn register(&self, spec: CommandSpec, owner: &PluginId) -> Result<Arc<CommandEntry>, RegistryError> {
        let name = normalize_label(&spec.name)?;
        let mut aliases: Vec<String> = Vec::with_capacity(spec.aliases.len());
        for alias in &spec.aliases {
            let alias = normalize_label(alias)?;
            if alias != name && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }

        let entry = Arc::new(CommandEntry {
            name: name.clone(),
            aliases,
            description: spec.description,
            usage: spec.usage.unwrap_or_else(|| format!("/{}", name)),
            permission: spec.permission,
            owner: owner.clone(),
            handler: spec.handler,
        });

        {
            let mut table = self.table.write();

            // Check every label before touching the table.
            if let Some((label, existing)) = entry
                .labels()
                .find_map(|label| table.labels.get(label).map(|existing| (label, existing)))
            {
                warn!(
                    "Plugin '{}' cannot register /{}: label '{}' is taken by /{}",
                    owner, name, label, existing
                );
                return Err(RegistryError::DuplicateCommand {
                    label: label.to_string(),
                    existing: existing.clone(),
                });
            }

            for label in entry.labels() {
                table.labels.insert(label.to_string(), name.clone());
            }
            table.entries.insert(name.clone(), Arc::clone(&entry));
            table.owners.insert(owner, name.clone());
        }

        debug!("Registered command /{} (aliases {:?}) for plugin '{}'", name, entry.aliases(), owner);
        Ok(entry)
    }

    /// Resolve a name or alias, case-insensitively
    pub fn lookup(&self, label: &str) -> Option<Arc<CommandEntry>> {
        let label = label.trim().to_lowercase();
        let table = self.table.read();
        let name = table.labels.get(&label)?;
        table.entries.get(name).cloned()
    }

    pub fn is_registered(&self, label: &str) -> bool {
        self.lookup(label).is_some()
    }

    /// Remove one command and its aliases; only the owner may do so
    pub fn unregister(&self, name: &str, owner: &PluginId) -> Result<Arc<CommandEntry>, RegistryError> {
        let name = normalize_label(name)?;
        let mut table = self.table.write();

        let entry = table
            .entries
            .get(&name)
            .ok_or_else(|| RegistryError::NotFound(name.clone()))?;
        if entry.owner() != owner {
            return Err(RegistryError::NotOwner {
                key: name,
                owner: entry.owner().clone(),
                requester: owner.clone(),
            });
        }

        table.owners.remove(owner, &name);
        let entry = table
            .detach(&name)
            .ok_or_else(|| RegistryError::NotFound(name.clone()))?;
        debug!("Unregistered command /{} for plugin '{}'", name, owner);
        Ok(entry)
    }

    /// Remove every command, with all aliases, owned by `owner` in one step
    pub fn unregister_all(&self, owner: &PluginId) -> Vec<String> {
        let removed: Vec<String> = {
            let mut table = self.table.write();
            let names = table.owners.take(owner);
            names
                .into_iter()
                .filter(|name| table.detach(name).is_some())
                .collect()
        };

        if !removed.is_empty() {
            info!("Removed {} commands owned by '{}'", removed.len(), owner);
        }
        removed
    }

    /// Sorted primary names of every registered command
    pub fn snapshot_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.read().entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every registered command, sorted by primary name
    pub fn snapshot_entries(&self) -> Vec<Arc<CommandEntry>> {
        let mut entries: Vec<Arc<CommandEntry>> = self.table.read().entries.values().cloned().collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
    }

    pub fn names_owned_by(&self, owner: &PluginId) -> Vec<String> {
        self.table.read().owners.keys_of(owner)
    }

    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().entries.is_empty()
    }

    /// Parse a console or chat line and run the matching command
    ///
    /// A leading `/` is ignored and arguments are split on whitespace. The
    /// registry lock is released before the handler runs.
    pub fn dispatch(&self, sender: CommandSender, line: &str) -> Result<CommandResponse, CommandError> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);

        let mut parts = line.split_whitespace();
        let label = parts.next().ok_or(CommandError::Empty)?;
        let args: Vec<String> = parts.map(str::to_string).collect();

        let entry = self
            .lookup(label)
            .ok_or_else(|| CommandError::Unknown(label.to_string()))?;

        let mut ctx = CommandContext::new(sender, label.to_lowercase(), args);
        let outcome = entry.execute(&mut ctx)?;
        Ok(CommandResponse {
            outcome,
            output: ctx.output,
        })
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_label(raw: &str) -> Result<String, RegistryError> {
    let label = raw.trim();
    if label.is_empty() || label.chars().any(char::is_whitespace) {
        return Err(RegistryError::InvalidLabel(raw.to_string()));
    }
    Ok(label.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(name: &str) -> PluginId {
        PluginId::new(name).unwrap()
    }

    fn ok_handler(ctx: &mut CommandContext) -> anyhow::Result<CommandOutcome> {
        ctx.reply(format!("ran {}", ctx.label()));
        Ok(CommandOutcome::Success)
    }

    #[test]
    fn test_lookup_by_name_and_alias() {
        let registry = CommandRegistry::new();
        registry
            .register(CommandSpec::new("help", ok_handler).alias("?").alias("h"), &owner("plugin_a"))
            .unwrap();

        let by_name = registry.lookup("help").unwrap();
        let by_alias = registry.lookup("?").unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_alias));
        assert!(registry.is_registered("HELP"));
        assert_eq!(by_name.aliases(), &["?".to_string(), "h".to_string()]);
    }

    #[test]
    fn test_alias_collision_rejects_whole_registration() {
        let registry = CommandRegistry::new();
        registry
            .register(CommandSpec::new("help", ok_handler).alias("?"), &owner("plugin_a"))
            .unwrap();

        let err = registry
            .register(CommandSpec::new("info", ok_handler).alias("i").alias("?"), &owner("plugin_b"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateCommand {
                label: "?".to_string(),
                existing: "help".to_string()
            }
        );

        assert!(registry.lookup("info").is_none());
        assert!(registry.lookup("i").is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.names_owned_by(&owner("plugin_b")).is_empty());
    }

    #[test]
    fn test_name_colliding_with_alias_is_rejected() {
        let registry = CommandRegistry::new();
        registry
            .register(CommandSpec::new("teleport", ok_handler).alias("tp"), &owner("plugin_a"))
            .unwrap();

        let err = registry
            .register(CommandSpec::new("tp", ok_handler), &owner("plugin_b"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCommand { .. }));
    }

    #[test]
    fn test_duplicate_aliases_collapse() {
        let registry = CommandRegistry::new();
        let entry = registry
            .register(
                CommandSpec::new("Spawn", ok_handler).aliases(["s", "S", "spawn"]),
                &owner("plugin_a"),
            )
            .unwrap();
        assert_eq!(entry.name(), "spawn");
        assert_eq!(entry.aliases(), &["s".to_string()]);
    }

    #[test]
    fn test_default_usage_follows_normalized_name() {
        let registry = CommandRegistry::new();
        let entry = registry
            .register(CommandSpec::new("  Spawn ", ok_handler), &owner("plugin_a"))
            .unwrap();
        assert_eq!(entry.usage(), "/spawn");

        let custom = registry
            .register(CommandSpec::new("Warp", ok_handler).usage("/warp <name>"), &owner("plugin_a"))
            .unwrap();
        assert_eq!(custom.usage(), "/warp <name>");
    }

    #[test]
    fn test_invalid_labels() {
        let registry = CommandRegistry::new();
        assert!(matches!(
            registry.register(CommandSpec::new("  ", ok_handler), &owner("plugin_a")),
            Err(RegistryError::InvalidLabel(_))
        ));
        assert!(matches!(
            registry.register(CommandSpec::new("two words", ok_handler), &owner("plugin_a")),
            Err(RegistryError::InvalidLabel(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_all_drops_aliases() {
        let registry = CommandRegistry::new();
        let a = owner("plugin_a");
        let b = owner("plugin_b");

        registry.register(CommandSpec::new("help", ok_handler).alias("?"), &a).unwrap();
        registry.register(CommandSpec::new("home", ok_handler), &a).unwrap();
        registry.register(CommandSpec::new("info", ok_handler).alias("i"), &b).unwrap();

        let removed = registry.unregister_all(&a);
        assert_eq!(removed, vec!["help".to_string(), "home".to_string()]);
        assert!(registry.lookup("?").is_none());
        assert!(registry.lookup("help").is_none());
        assert!(registry.lookup("i").is_some());

        // The freed alias can now be claimed by someone else.
        registry.register(CommandSpec::new("query", ok_handler).alias("?"), &b).unwrap();
        assert_eq!(registry.lookup("?").unwrap().name(), "query");
    }

    #[test]
    fn test_unregister_single_checks_owner() {
        let registry = CommandRegistry::new();
        registry
            .register(CommandSpec::new("help", ok_handler).alias("?"), &owner("plugin_a"))
            .unwrap();

        assert!(matches!(
            registry.unregister("help", &owner("plugin_b")),
            Err(RegistryError::NotOwner { .. })
        ));
        registry.unregister("help", &owner("plugin_a")).unwrap();
        assert!(registry.lookup("?").is_none());
        assert!(matches!(
            registry.unregister("help", &owner("plugin_a")),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_dispatch() {
        let registry = CommandRegistry::new();
        registry
            .register(
                CommandSpec::new("echo", |ctx: &mut CommandContext| -> anyhow::Result<CommandOutcome> {
                    if ctx.args().is_empty() {
                        return Ok(CommandOutcome::Usage);
                    }
                    let line = ctx.args().join(" ");
                    ctx.reply(line);
                    Ok(CommandOutcome::Success)
                })
                .alias("say"),
                &owner("plugin_a"),
            )
            .unwrap();

        let response = registry.dispatch(CommandSender::Console, "/say hello  world").unwrap();
        assert_eq!(response.outcome, CommandOutcome::Success);
        assert_eq!(response.output, vec!["hello world".to_string()]);

        let response = registry.dispatch(CommandSender::Console, "echo").unwrap();
        assert_eq!(response.outcome, CommandOutcome::Usage);

        assert_eq!(
            registry.dispatch(CommandSender::Console, "/nope"),
            Err(CommandError::Unknown("nope".to_string()))
        );
        assert_eq!(registry.dispatch(CommandSender::Console, "   "), Err(CommandError::Empty));
    }

    #[test]
    fn test_handler_error_is_reported() {
        let registry = CommandRegistry::new();
        registry
            .register(
                CommandSpec::new("boom", |_: &mut CommandContext| -> anyhow::Result<CommandOutcome> {
                    anyhow::bail!("exploded")
                }),
                &owner("plugin_a"),
            )
            .unwrap();

        let err = registry
            .dispatch(CommandSender::Player("steve".to_string()), "boom")
            .unwrap_err();
        assert!(matches!(err, CommandError::Failed { ref command, .. } if command == "boom"));
    }

    #[test]
    fn test_snapshots() {
        let registry = CommandRegistry::new();
        registry.register(CommandSpec::new("b", ok_handler), &owner("plugin_a")).unwrap();
        registry.register(CommandSpec::new("a", ok_handler).alias("x"), &owner("plugin_a")).unwrap();

        assert_eq!(registry.snapshot_names(), vec!["a".to_string(), "b".to_string()]);
        let entries = registry.snapshot_entries();
        assert_eq!(entries[0].name(), "a");
        assert_eq!(entries[0].labels().collect::<Vec<_>>(), vec!["a", "x"]);
    }
}
