//! Permissions boundary
//!
//! No permission model exists yet. The core exposes the interface so a policy
//! engine can be plugged in later; until then every query fails loudly with
//! [`PermissionsError::NotImplemented`]. Registry and scheduler operations never
//! consult it.

use crate::registry::CommandSender;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionsError {
    #[error("Permissions are not implemented ({0})")]
    NotImplemented(&'static str),
}

/// Resolves permission nodes for command senders
pub trait PermissionsManager: Send + Sync {
    fn has_permission(&self, sender: &CommandSender, node: &str) -> Result<bool, PermissionsError>;

    fn grant(&self, sender: &CommandSender, node: &str) -> Result<(), PermissionsError>;

    fn revoke(&self, sender: &CommandSender, node: &str) -> Result<(), PermissionsError>;
}

/// Placeholder installed by default
#[derive(Debug, Default, Clone, Copy)]
pub struct UnimplementedPermissions;

impl PermissionsManager for UnimplementedPermissions {
    fn has_permission(&self, _sender: &CommandSender, _node: &str) -> Result<bool, PermissionsError> {
        Err(PermissionsError::NotImplemented("has_permission"))
    }

    fn grant(&self, _sender: &CommandSender, _node: &str) -> Result<(), PermissionsError> {
        Err(PermissionsError::NotImplemented("grant"))
    }

    fn revoke(&self, _sender: &CommandSender, _node: &str) -> Result<(), PermissionsError> {
        Err(PermissionsError::NotImplemented("revoke"))
    }
}
