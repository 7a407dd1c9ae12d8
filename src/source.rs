//! Entity sources and federation settings.
//!
//! A store instance writes terms for the entities of one source. Under
//! entity-source federation, a source is either local (its terms live in this
//! database) or remote (owned by another database and read-only here).

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

/// Where the entities handled by a store come from.
///
/// # Examples
///
/// ```
/// use termstore::{EntityKind, EntitySource};
///
/// let local = EntitySource::local("wikidata", [EntityKind::Item, EntityKind::Property]);
/// assert!(local.is_local());
/// assert!(local.provides(EntityKind::Property));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySource {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    entity_kinds: Vec<EntityKind>,
}

impl EntitySource {
    /// A source whose entities are stored in this database.
    #[must_use]
    pub fn local(name: impl Into<String>, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            name: name.into(),
            database: None,
            entity_kinds: kinds.into_iter().collect(),
        }
    }

    /// A source owned by another database.
    #[must_use]
    pub fn remote(
        name: impl Into<String>,
        database: impl Into<String>,
        kinds: impl IntoIterator<Item = EntityKind>,
    ) -> Self {
        Self {
            name: name.into(),
            database: Some(database.into()),
            entity_kinds: kinds.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the owning database, `None` for local sources.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.database.is_none()
    }

    #[must_use]
    pub fn entity_kinds(&self) -> &[EntityKind] {
        &self.entity_kinds
    }

    #[must_use]
    pub fn provides(&self, kind: EntityKind) -> bool {
        self.entity_kinds.contains(&kind)
    }
}

/// How entity ownership is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FederationMode {
    /// Ownership follows repository prefixes on ids; prefixed ids are foreign.
    #[default]
    RepositoryPrefix,
    /// Ownership follows the configured [`EntitySource`].
    EntitySource,
}
