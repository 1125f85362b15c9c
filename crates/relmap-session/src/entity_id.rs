//! Canonical row identities.
//!
//! An [`EntityId`] names one row of one entity inside a session. The session
//! hands out exactly one instance per (entity, key material) pair, so two ids
//! for the same row are not only equal but share storage, and the identity
//! cache and snapshot table can key on them cheaply.
//!
//! # Design
//!
//! Key material is either the full primary-key tuple or a single
//! `(key, value)` pair used when a to-one relationship joins on a non-key
//! property. The hash is computed once at construction; equality checks
//! pointer identity first and only then compares structure.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use relmap_core::{CacheStrategy, RowId, Value};

/// What identifies the row within its entity.
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum IdentityKind {
    PrimaryKey(RowId),
    KeyValue { key: String, value: Value },
}

impl Eq for IdentityKind {}

#[derive(Debug)]
struct Inner {
    entity: String,
    strategy: CacheStrategy,
    kind: IdentityKind,
    hash: u64,
}

/// Session-scoped identity of one row.
#[derive(Clone)]
pub struct EntityId(Arc<Inner>);

impl EntityId {
    fn build(entity: String, strategy: CacheStrategy, kind: IdentityKind) -> Self {
        let mut hasher = DefaultHasher::new();
        entity.hash(&mut hasher);
        kind.hash(&mut hasher);
        let hash = hasher.finish();
        Self(Arc::new(Inner {
            entity,
            strategy,
            kind,
            hash,
        }))
    }

    /// Identity by primary-key tuple.
    pub fn primary_key(entity: impl Into<String>, strategy: CacheStrategy, pk: RowId) -> Self {
        Self::build(entity.into(), strategy, IdentityKind::PrimaryKey(pk))
    }

    /// Identity by a single non-key property, for to-one lookups.
    pub fn key_value(
        entity: impl Into<String>,
        strategy: CacheStrategy,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::build(
            entity.into(),
            strategy,
            IdentityKind::KeyValue {
                key: key.into(),
                value,
            },
        )
    }

    pub fn entity(&self) -> &str {
        &self.0.entity
    }

    /// Cache strategy of the entity. Not part of equality.
    pub fn strategy(&self) -> CacheStrategy {
        self.0.strategy
    }

    pub fn kind(&self) -> &IdentityKind {
        &self.0.kind
    }

    pub fn row_id(&self) -> Option<&RowId> {
        match &self.0.kind {
            IdentityKind::PrimaryKey(pk) => Some(pk),
            IdentityKind::KeyValue { .. } => None,
        }
    }

    /// Do both handles share one allocation?
    pub fn ptr_eq(&self, other: &EntityId) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for EntityId {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.0.hash == other.0.hash
                && self.0.entity == other.0.entity
                && self.0.kind == other.0.kind)
    }
}

impl Eq for EntityId {}

impl Hash for EntityId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            IdentityKind::PrimaryKey(pk) => write!(f, "{}{}", self.0.entity, pk),
            IdentityKind::KeyValue { key, value } => {
                write!(f, "{}[{}={}]", self.0.entity, key, value)
            }
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self)
    }
}
