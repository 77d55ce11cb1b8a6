//! Plugin host boundary
//!
//! Plugin loading itself lives outside the core. What the core provides is the
//! owner key every registration is filed under, an owner-scoped context handed
//! to plugins while they are enabled, and the purge performed when a plugin
//! goes away.

use crate::identifier::Identifier;
use crate::registry::{CommandEntry, CommandSpec, ContentDefinition, RegistryError};
use crate::scheduler::OwnedScheduler;
use crate::server::ServerCore;
use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Owner key for everything a plugin registers
///
/// Always lowercase, non-empty, without whitespace or `:`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(Arc<str>);

/// Rejected plugin id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid plugin id '{0}': must be non-empty without whitespace or ':'")]
pub struct InvalidPluginId(pub String);

impl PluginId {
    pub fn new(name: &str) -> Result<Self, InvalidPluginId> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.contains(|c: char| c.is_whitespace() || c == ':') {
            return Err(InvalidPluginId(name.to_string()));
        }
        Ok(Self(Arc::from(trimmed.to_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginId({})", self.0)
    }
}

impl TryFrom<&str> for PluginId {
    type Error = InvalidPluginId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Serialize for PluginId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for PluginId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Plugin information and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name; its lowercase form becomes the [`PluginId`]
    pub name: String,
    pub version: semver::Version,
    pub description: String,
    pub authors: Vec<String>,
}

impl PluginInfo {
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: String::new(),
            authors: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    /// Owner key derived from the plugin name
    pub fn id(&self) -> Result<PluginId, InvalidPluginId> {
        PluginId::new(&self.name)
    }
}

/// Trait implemented by every plugin the host loads
pub trait Plugin: Send + Sync {
    fn info(&self) -> PluginInfo;

    /// Register content, commands and tasks
    ///
    /// Returning an error makes the core purge whatever this call had already
    /// registered.
    fn on_enable(&self, ctx: &PluginContext<'_>) -> Result<()>;

    /// Called before the plugin's registrations are purged
    fn on_disable(&self, _ctx: &PluginContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Owner-scoped view of the core handed to a plugin
///
/// Every registration made through it is filed under the plugin's own id.
pub struct PluginContext<'a> {
    core: &'a ServerCore,
    owner: PluginId,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(core: &'a ServerCore, owner: PluginId) -> Self {
        Self { core, owner }
    }

    pub fn owner(&self) -> &PluginId {
        &self.owner
    }

    pub fn core(&self) -> &'a ServerCore {
        self.core
    }

    pub fn register_content(
        &self,
        id: &str,
        definition: ContentDefinition,
    ) -> Result<Arc<ContentDefinition>, RegistryError> {
        self.core.game_registry().register_str(id, definition, &self.owner)
    }

    pub fn register_content_id(
        &self,
        id: Identifier,
        definition: ContentDefinition,
    ) -> Result<Arc<ContentDefinition>, RegistryError> {
        self.core.game_registry().register(id, definition, &self.owner)
    }

    pub fn register_command(&self, spec: CommandSpec) -> Result<Arc<CommandEntry>, RegistryError> {
        self.core.command_registry().register(spec, &self.owner)
    }

    /// Scheduler front-end whose tasks are cancelled when the plugin unloads
    pub fn scheduler(&self) -> OwnedScheduler<'a> {
        self.core.scheduler().owned(self.owner.clone())
    }

    /// `<plugins>/<plugin id>`; not created automatically
    pub fn data_dir(&self) -> PathBuf {
        self.core.directories().plugins.join(self.owner.as_str())
    }
}

/// What an unload removed on behalf of one plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub owner: PluginId,
    pub content: Vec<Identifier>,
    pub commands: Vec<String>,
    pub tasks_cancelled: usize,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.commands.is_empty() && self.tasks_cancelled == 0
    }
}
