//! Entity identifiers.
//!
//! Terms attach to entities of a fixed set of kinds. Each kind has its own
//! association table, so the kind is part of the identity. An id may carry a
//! repository prefix (`wd:Q42`), which marks it as belonging to another
//! repository.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Kinds of term-bearing entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Items, serialized as `Q<n>`.
    Item,
    /// Properties, serialized as `P<n>`.
    Property,
}

impl EntityKind {
    /// All kinds, in association-table lock order.
    pub const ALL: [Self; 2] = [Self::Item, Self::Property];

    /// The serialization prefix for ids of this kind.
    #[must_use]
    pub const fn prefix(self) -> char {
        match self {
            Self::Item => 'Q',
            Self::Property => 'P',
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Property => "property",
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'Q' => Some(Self::Item),
            'P' => Some(Self::Property),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a term-bearing entity.
///
/// # Examples
///
/// ```
/// use termstore::{EntityId, EntityKind};
///
/// let id: EntityId = "P31".parse().unwrap();
/// assert_eq!(id.kind(), EntityKind::Property);
/// assert_eq!(id.numeric(), 31);
/// assert!(!id.is_foreign());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    kind: EntityKind,
    numeric: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repository: Option<String>,
}

impl EntityId {
    /// Creates a local entity id.
    #[must_use]
    pub const fn new(kind: EntityKind, numeric: u64) -> Self {
        Self {
            kind,
            numeric,
            repository: None,
        }
    }

    /// Shorthand for a local item id.
    #[must_use]
    pub const fn item(numeric: u64) -> Self {
        Self::new(EntityKind::Item, numeric)
    }

    /// Shorthand for a local property id.
    #[must_use]
    pub const fn property(numeric: u64) -> Self {
        Self::new(EntityKind::Property, numeric)
    }

    /// Creates an id qualified by another repository's prefix.
    #[must_use]
    pub fn foreign(repository: impl Into<String>, kind: EntityKind, numeric: u64) -> Self {
        Self {
            kind,
            numeric,
            repository: Some(repository.into()),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    /// The numeric part, which keys the association table of this kind.
    #[must_use]
    pub const fn numeric(&self) -> u64 {
        self.numeric
    }

    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// Returns true if the id is qualified by another repository.
    #[must_use]
    pub const fn is_foreign(&self) -> bool {
        self.repository.is_some()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(repo) = &self.repository {
            write!(f, "{repo}:")?;
        }
        write!(f, "{}{}", self.kind.prefix(), self.numeric)
    }
}

impl FromStr for EntityId {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::InvalidEntityId {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (repository, local) = match input.rsplit_once(':') {
            Some((repo, _)) if repo.is_empty() => return Err(invalid("empty repository prefix")),
            Some((repo, local)) => (Some(repo.to_string()), local),
            None => (None, input),
        };

        let mut chars = local.chars();
        let kind = chars
            .next()
            .and_then(EntityKind::from_prefix)
            .ok_or_else(|| invalid("expected a Q or P prefix"))?;
        let digits = chars.as_str();
        if digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || digits.starts_with('0')
        {
            return Err(invalid("expected a positive number without leading zeros"));
        }
        let numeric = digits
            .parse::<u64>()
            .map_err(|_| invalid("number out of range"))?;

        Ok(Self {
            kind,
            numeric,
            repository,
        })
    }
}
