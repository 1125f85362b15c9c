//! Relationship and inheritance metadata.
//!
//! A relationship is a named edge from a source entity to a destination
//! entity. The destination is stored by name and resolved against the
//! owning model on lookup, so entities may be declared in any order.
//!
//! Join keys are property keys, not column names: the implied query of a
//! relationship is `destination.destination_key = source.source_key`.

use serde::{Deserialize, Serialize};

/// How many destination objects a relationship holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Multiplicity {
    /// Zero or one destination object.
    #[default]
    ToOne,
    /// Any number of destination objects, loaded lazily unless prefetched.
    ToMany,
}

/// Metadata about a relationship between entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Name of the relationship property on the source object.
    pub name: String,

    /// Destination entity name, resolved in the owning model.
    pub destination: String,

    /// Property key on the source whose value drives the join.
    pub source_key: String,

    /// Property key on the destination matched against the source value.
    pub destination_key: String,

    pub multiplicity: Multiplicity,

    /// Owned destinations are deleted with their source; others have their
    /// destination key nulled instead.
    pub owns_destination: bool,

    /// Resolve eagerly while the source row is materialized.
    pub prefetch: bool,

    /// Consult and fill the destination object cache on to-one lookups.
    pub cache_destination: bool,
}

impl Relationship {
    fn new(
        name: impl Into<String>,
        destination: impl Into<String>,
        source_key: impl Into<String>,
        destination_key: impl Into<String>,
        multiplicity: Multiplicity,
    ) -> Self {
        Self {
            name: name.into(),
            destination: destination.into(),
            source_key: source_key.into(),
            destination_key: destination_key.into(),
            multiplicity,
            owns_destination: false,
            prefetch: false,
            cache_destination: true,
        }
    }

    /// A to-one relationship.
    ///
    /// # Example
    ///
    /// ```ignore
    /// Relationship::to_one("team", "Team", "team_id", "id")
    /// ```
    pub fn to_one(
        name: impl Into<String>,
        destination: impl Into<String>,
        source_key: impl Into<String>,
        destination_key: impl Into<String>,
    ) -> Self {
        Self::new(name, destination, source_key, destination_key, Multiplicity::ToOne)
    }

    /// A to-many relationship.
    pub fn to_many(
        name: impl Into<String>,
        destination: impl Into<String>,
        source_key: impl Into<String>,
        destination_key: impl Into<String>,
    ) -> Self {
        Self::new(name, destination, source_key, destination_key, Multiplicity::ToMany)
    }

    /// Cascade deletes to the destination objects.
    pub fn owns_destination(mut self, value: bool) -> Self {
        self.owns_destination = value;
        self
    }

    pub fn prefetch(mut self, value: bool) -> Self {
        self.prefetch = value;
        self
    }

    pub fn cache_destination(mut self, value: bool) -> Self {
        self.cache_destination = value;
        self
    }

    pub const fn is_to_many(&self) -> bool {
        matches!(self.multiplicity, Multiplicity::ToMany)
    }
}

/// How a child entity is stored relative to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InheritanceKind {
    /// Child rows share the parent's table and are told apart by a
    /// discriminator field/value pair.
    SingleTable {
        discriminator_key: String,
        discriminator_value: String,
    },
    /// Each concrete class has its own table.
    TablePerClass,
}

/// Inheritance descriptor: the parent entity plus the storage kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inheritance {
    pub parent: String,
    pub kind: InheritanceKind,
}

impl Inheritance {
    pub fn single_table(
        parent: impl Into<String>,
        discriminator_key: impl Into<String>,
        discriminator_value: impl Into<String>,
    ) -> Self {
        Self {
            parent: parent.into(),
            kind: InheritanceKind::SingleTable {
                discriminator_key: discriminator_key.into(),
                discriminator_value: discriminator_value.into(),
            },
        }
    }

    pub fn table_per_class(parent: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            kind: InheritanceKind::TablePerClass,
        }
    }

    pub const fn is_single_table(&self) -> bool {
        matches!(self.kind, InheritanceKind::SingleTable { .. })
    }

    /// Discriminator `(key, value)` under single-table inheritance.
    pub fn discriminator(&self) -> Option<(&str, &str)> {
        match &self.kind {
            InheritanceKind::SingleTable {
                discriminator_key,
                discriminator_value,
            } => Some((discriminator_key, discriminator_value)),
            InheritanceKind::TablePerClass => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_defaults() {
        let rel = Relationship::to_many("members", "Member", "id", "team_id");
        assert!(rel.is_to_many());
        assert!(!rel.owns_destination);
        assert!(!rel.prefetch);
        assert!(rel.cache_destination);

        let rel = Relationship::to_one("team", "Team", "team_id", "id")
            .owns_destination(true)
            .prefetch(true)
            .cache_destination(false);
        assert!(!rel.is_to_many());
        assert!(rel.owns_destination && rel.prefetch && !rel.cache_destination);
    }

    #[test]
    fn test_inheritance_discriminator() {
        let single = Inheritance::single_table("Vehicle", "kind", "car");
        assert!(single.is_single_table());
        assert_eq!(single.discriminator(), Some(("kind", "car")));

        let per_class = Inheritance::table_per_class("Vehicle");
        assert!(!per_class.is_single_table());
        assert_eq!(per_class.discriminator(), None);
    }
}
