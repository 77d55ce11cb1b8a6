//! Concurrent registries shared by every plugin
//!
//! Both registries keep a primary map and an [`OwnerIndex`] behind a single
//! `RwLock`, so a registration and its index update (or a bulk removal and its
//! index update) are observed atomically by readers on other threads.

pub mod command;
pub mod game;

pub use command::{
    CommandContext, CommandEntry, CommandError, CommandHandler, CommandOutcome, CommandRegistry,
    CommandResponse, CommandSender, CommandSpec,
};
pub use game::{ContentBehavior, ContentDefinition, ContentKind, GameRegistry};

use crate::identifier::IdentifierError;
use crate::plugin::PluginId;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Secondary index from owning plugin to the keys it registered
///
/// Every key in a registry's primary map appears in exactly one owner's set.
#[derive(Debug)]
pub(crate) struct OwnerIndex<K> {
    owners: HashMap<PluginId, BTreeSet<K>>,
}

impl<K: Ord + Hash + Clone> OwnerIndex<K> {
    pub fn new() -> Self {
        Self {
            owners: HashMap::new(),
        }
    }

    pub fn insert(&mut self, owner: &PluginId, key: K) {
        self.owners.entry(owner.clone()).or_default().insert(key);
    }

    pub fn remove(&mut self, owner: &PluginId, key: &K) {
        if let Some(keys) = self.owners.get_mut(owner) {
            keys.remove(key);
            if keys.is_empty() {
                self.owners.remove(owner);
            }
        }
    }

    /// Detach and return every key owned by `owner`
    pub fn take(&mut self, owner: &PluginId) -> BTreeSet<K> {
        self.owners.remove(owner).unwrap_or_default()
    }

    pub fn keys_of(&self, owner: &PluginId) -> Vec<K> {
        self.owners
            .get(owner)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    #[cfg(test)]
    pub fn total_keys(&self) -> usize {
        self.owners.values().map(BTreeSet::len).sum()
    }
}

/// Registration and removal failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Identifier '{0}' is already registered")]
    DuplicateIdentifier(String),
    #[error("Command label '{label}' is already taken by '/{existing}'")]
    DuplicateCommand { label: String, existing: String },
    #[error("'{0}' is not registered")]
    NotFound(String),
    #[error("'{key}' is owned by plugin '{owner}', not '{requester}'")]
    NotOwner {
        key: String,
        owner: PluginId,
        requester: PluginId,
    },
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
    #[error("Invalid command label '{0}'")]
    InvalidLabel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_index_take_and_remove() {
        let a = PluginId::new("plugin_a").unwrap();
        let b = PluginId::new("plugin_b").unwrap();

        let mut index = OwnerIndex::new();
        index.insert(&a, "one".to_string());
        index.insert(&a, "two".to_string());
        index.insert(&b, "three".to_string());
        assert_eq!(index.total_keys(), 3);
        assert_eq!(index.owner_count(), 2);

        index.remove(&b, &"three".to_string());
        assert_eq!(index.owner_count(), 1);

        let taken = index.take(&a);
        assert_eq!(taken.len(), 2);
        assert_eq!(index.total_keys(), 0);
        assert!(index.keys_of(&a).is_empty());
    }
}
