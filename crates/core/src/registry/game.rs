//! Registry of game content definitions (blocks, items, entities, ...)

use super::{OwnerIndex, RegistryError};
use crate::identifier::Identifier;
use crate::plugin::PluginId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Category of a registrable game element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Block,
    Item,
    Entity,
    Biome,
    Other(String),
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::Item => write!(f, "item"),
            Self::Entity => write!(f, "entity"),
            Self::Biome => write!(f, "biome"),
            Self::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// Behaviour hooks supplied by the plugin that owns a definition
///
/// Hooks run after the registry change is visible to other threads and
/// outside the registry lock, so they may call back into the registry.
pub trait ContentBehavior: Send + Sync {
    fn on_registered(&self, _id: &Identifier) {}

    fn on_unregistered(&self, _id: &Identifier) {}
}

/// Immutable description of one registrable game element
#[derive(Clone)]
pub struct ContentDefinition {
    kind: ContentKind,
    display_name: String,
    properties: serde_json::Map<String, serde_json::Value>,
    behavior: Option<Arc<dyn ContentBehavior>>,
}

impl ContentDefinition {
    pub fn new(kind: ContentKind, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            display_name: display_name.into(),
            properties: serde_json::Map::new(),
            behavior: None,
        }
    }

    /// Attach a static property such as hardness or stack size
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Attach runtime behaviour invoked by the game loop
    pub fn with_behavior(mut self, behavior: Arc<dyn ContentBehavior>) -> Self {
        self.behavior = Some(behavior);
        self
    }

    /// Category of the content
    pub fn kind(&self) -> &ContentKind {
        &self.kind
    }

    /// Human-readable name shown to players
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Single static property, if set
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    /// All static properties in insertion order
    pub fn properties(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.properties
    }

    pub fn behavior(&self) -> Option<&Arc<dyn ContentBehavior>> {
        self.behavior.as_ref()
    }
}

impl fmt::Debug for ContentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentDefinition")
            .field("kind", &self.kind)
            .field("display_name", &self.display_name)
            .field("properties", &self.properties)
            .field("has_behavior", &self.behavior.is_some())
            .finish()
    }
}

struct ContentEntry {
    definition: Arc<ContentDefinition>,
    owner: PluginId,
}

struct ContentTable {
    entries: HashMap<Identifier, ContentEntry>,
    owners: OwnerIndex<Identifier>,
}

/// Registry mapping identifiers to content definitions
///
/// Registration is first-wins: a second registration of the same identifier
/// fails regardless of owner. Enumeration through [`GameRegistry::snapshot_ids`]
/// is taken under the read lock and reflects a single point in time.
pub struct GameRegistry {
    table: RwLock<ContentTable>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(ContentTable {
                entries: HashMap::new(),
                owners: OwnerIndex::new(),
            }),
        }
    }

    /// Register a definition under `id` on behalf of `owner`
    pub fn register(
        &self,
        id: Identifier,
        definition: ContentDefinition,
        owner: &PluginId,
    ) -> Result<Arc<ContentDefinition>, RegistryError> {
        let definition = Arc::new(definition);

        {
            let mut table = self.table.write();
            if let Some(existing) = table.entries.get(&id) {
                warn!(
                    "Plugin '{}' tried to register '{}' which is already owned by '{}'",
                    owner, id, existing.owner
                );
                return Err(RegistryError::DuplicateIdentifier(id.to_string()));
            }

            table.entries.insert(
                id.clone(),
                ContentEntry {
                    definition: Arc::clone(&definition),
                    owner: owner.clone(),
                },
            );
            table.owners.insert(owner, id.clone());
        }

        debug!("Registered {} '{}' for plugin '{}'", definition.kind(), id, owner);
        if let Some(behavior) = definition.behavior() {
            behavior.on_registered(&id);
        }

        Ok(definition)
    }

    /// Parse `id` and register it
    pub fn register_str(
        &self,
        id: &str,
        definition: ContentDefinition,
        owner: &PluginId,
    ) -> Result<Arc<ContentDefinition>, RegistryError> {
        let id = Identifier::parse(id)?;
        self.register(id, definition, owner)
    }

    /// Look up a definition; `None` is the normal "not found" answer
    pub fn lookup(&self, id: &Identifier) -> Option<Arc<ContentDefinition>> {
        self.table
            .read()
            .entries
            .get(id)
            .map(|entry| Arc::clone(&entry.definition))
    }

    /// Look up by textual identifier; unparsable input is simply not found
    pub fn lookup_str(&self, id: &str) -> Option<Arc<ContentDefinition>> {
        let id = Identifier::parse(id).ok()?;
        self.lookup(&id)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.table.read().entries.contains_key(id)
    }

    pub fn owner_of(&self, id: &Identifier) -> Option<PluginId> {
        self.table.read().entries.get(id).map(|entry| entry.owner.clone())
    }

    /// Remove a single entry; only its owner may do so
    pub fn unregister(&self, id: &Identifier, owner: &PluginId) -> Result<Arc<ContentDefinition>, RegistryError> {
        let removed = {
            let mut table = self.table.write();
            let entry = table
                .entries
                .get(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

            if &entry.owner != owner {
                return Err(RegistryError::NotOwner {
                    key: id.to_string(),
                    owner: entry.owner.clone(),
                    requester: owner.clone(),
                });
            }

            table.owners.remove(owner, id);
            table
                .entries
                .remove(id)
                .map(|entry| entry.definition)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?
        };

        debug!("Unregistered '{}' for plugin '{}'", id, owner);
        if let Some(behavior) = removed.behavior() {
            behavior.on_unregistered(id);
        }

        Ok(removed)
    }

    /// Remove every entry owned by `owner` in one step
    ///
    /// Concurrent readers observe either all of the owner's entries or none.
    pub fn unregister_all(&self, owner: &PluginId) -> Vec<Identifier> {
        let removed: Vec<(Identifier, Arc<ContentDefinition>)> = {
            let mut table = self.table.write();
            let ids = table.owners.take(owner);
            ids.into_iter()
                .filter_map(|id| {
                    let entry = table.entries.remove(&id)?;
                    Some((id, entry.definition))
                })
                .collect()
        };

        if !removed.is_empty() {
            info!("Removed {} content definitions owned by '{}'", removed.len(), owner);
        }

        for (id, definition) in &removed {
            if let Some(behavior) = definition.behavior() {
                behavior.on_unregistered(id);
            }
        }

        removed.into_iter().map(|(id, _)| id).collect()
    }

    pub fn ids_owned_by(&self, owner: &PluginId) -> Vec<Identifier> {
        self.table.read().owners.keys_of(owner)
    }

    /// Sorted point-in-time list of every registered identifier
    pub fn snapshot_ids(&self) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = self.table.read().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sorted identifiers of one content kind
    pub fn snapshot_by_kind(&self, kind: &ContentKind) -> Vec<Identifier> {
        let mut ids: Vec<Identifier> = self
            .table
            .read()
            .entries
            .iter()
            .filter(|(_, entry)| entry.definition.kind() == kind)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().entries.is_empty()
    }

    /// Number of plugins that currently own at least one entry
    pub fn owner_count(&self) -> usize {
        self.table.read().owners.owner_count()
    }
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self::new()
    }
}
