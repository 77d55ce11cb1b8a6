//! Namespaced identifiers for registrable content
//!
//! Identifiers follow the `namespace:path` convention used by Minecraft resource
//! locations. A bare path such as `stone` is placed in the default `minecraft`
//! namespace.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Namespace applied to identifiers written without one
pub const DEFAULT_NAMESPACE: &str = "minecraft";

/// Immutable `namespace:path` key, unique within a registry
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    full: Arc<str>,
    split: usize,
}

impl Identifier {
    /// Build an identifier from its two parts
    pub fn new(namespace: &str, path: &str) -> Result<Self, IdentifierError> {
        validate_namespace(namespace)?;
        validate_path(path)?;

        let full: Arc<str> = format!("{}:{}", namespace, path).into();
        Ok(Self {
            full,
            split: namespace.len(),
        })
    }

    /// Parse `namespace:path`, or a bare `path` in the default namespace
    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        if input.is_empty() {
            return Err(IdentifierError::Empty);
        }

        match input.split_once(':') {
            Some((namespace, path)) => Self::new(namespace, path),
            None => Self::new(DEFAULT_NAMESPACE, input),
        }
    }

    /// Part before the colon, e.g. `minecraft`
    pub fn namespace(&self) -> &str {
        &self.full[..self.split]
    }

    /// Part after the colon; may contain `/`
    pub fn path(&self) -> &str {
        &self.full[self.split + 1..]
    }

    /// The full `namespace:path` form
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

fn validate_namespace(namespace: &str) -> Result<(), IdentifierError> {
    if namespace.is_empty() {
        return Err(IdentifierError::EmptyNamespace);
    }

    if let Some(c) = namespace.chars().find(|c| !is_namespace_char(*c)) {
        return Err(IdentifierError::InvalidCharacter {
            character: c,
            part: "namespace",
        });
    }

    Ok(())
}

fn validate_path(path: &str) -> Result<(), IdentifierError> {
    if path.is_empty() {
        return Err(IdentifierError::EmptyPath);
    }

    if let Some(c) = path.chars().find(|c| !is_path_char(*c)) {
        return Err(IdentifierError::InvalidCharacter {
            character: c,
            part: "path",
        });
    }

    Ok(())
}

#[inline]
fn is_namespace_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '_' | '-' | '.')
}

#[inline]
fn is_path_char(c: char) -> bool {
    is_namespace_char(c) || c == '/'
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.full)
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Reasons an identifier was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("Identifier cannot be empty")]
    Empty,
    #[error("Identifier namespace cannot be empty")]
    EmptyNamespace,
    #[error("Identifier path cannot be empty")]
    EmptyPath,
    #[error("Invalid character '{character}' in identifier {part}")]
    InvalidCharacter { character: char, part: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced() {
        let id = Identifier::parse("core:stone").unwrap();
        assert_eq!(id.namespace(), "core");
        assert_eq!(id.path(), "stone");
        assert_eq!(id.to_string(), "core:stone");
    }

    #[test]
    fn test_bare_path_gets_default_namespace() {
        let id: Identifier = "dirt".parse().unwrap();
        assert_eq!(id.namespace(), DEFAULT_NAMESPACE);
        assert_eq!(id, Identifier::parse("minecraft:dirt").unwrap());
    }

    #[test]
    fn test_path_may_contain_slashes() {
        let id = Identifier::parse("mymod:blocks/copper_ore").unwrap();
        assert_eq!(id.path(), "blocks/copper_ore");
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert_eq!(Identifier::parse(""), Err(IdentifierError::Empty));
        assert_eq!(Identifier::parse(":stone"), Err(IdentifierError::EmptyNamespace));
        assert_eq!(Identifier::parse("core:"), Err(IdentifierError::EmptyPath));
        assert!(matches!(
            Identifier::parse("Core:stone"),
            Err(IdentifierError::InvalidCharacter { character: 'C', part: "namespace" })
        ));
        assert!(matches!(
            Identifier::parse("core:sto ne"),
            Err(IdentifierError::InvalidCharacter { character: ' ', part: "path" })
        ));
        // The namespace ends at the first colon, so a second one lands in the path.
        assert!(Identifier::parse("a:b:c").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = Identifier::parse("core:stone").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"core:stone\"");

        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<Identifier>("\"BAD ID\"").is_err());
    }
}
