//! relmap - object-relational mapping with identity, snapshot caching and a
//! transacted unit of work.
//!
//! relmap maps plain Rust structs onto database rows through a registry of
//! entity descriptions, providing:
//!
//! - One live object per row per context, with per-entity cache expiry
//! - Predicates that lower to SQL and evaluate in memory alike
//! - Lazily faulted to-many relationships and cached to-one lookups
//! - A unit of work that drains inserts, updates and deletes in one native
//!   transaction, with cascading deletes and optimistic locking
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! #[derive(Record, Default)]
//! struct Hero {
//!     id: i64,
//!     name: Option<String>,
//! }
//!
//! let registry = Registry::builder()
//!     .model(Model::new("main").entity(
//!         Entity::new::<Hero>("Hero", "heroes")
//!             .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
//!             .field(Field::new("name", "NAME", ValueType::Text)),
//!     ))
//!     .build()?;
//!
//! let db = MemoryDatabase::new();
//! db.execute_raw("CREATE TABLE heroes (ID, NAME)")?;
//! let mut ctx = Context::new(Arc::new(registry), move |_: &Model| {
//!     Ok(Box::new(db.connect()) as Box<dyn Connection>)
//! });
//!
//! // Insert
//! let hero = object_ref(Hero { id: 1, name: Some("Spider-Man".into()) });
//! ctx.insert(&hero)?;
//! ctx.save_changes()?;
//!
//! // Query: the same instance comes back
//! let found = ctx.find("Hero", 1)?;
//! assert!(Arc::ptr_eq(&found.unwrap(), &hero));
//! ```
//!
//! Types deriving `Record` expand to paths under `relmap_core`, so crates
//! using the derive depend on `relmap-core` next to `relmap`.

// Re-export all public types from sub-crates
pub use relmap_core::{
    Assign, CacheStrategy, Connection, ConnectionInfo, Entity, Error, Faulting, Field,
    FieldAccess, IncrementKeyGenerator, Inheritance, InheritanceKind, IsolationLevel,
    LockingStrategy, Model, Multiplicity, ObjectRef, PrimaryKeyGenerator, Record, RecordEvents,
    Registry, RegistryBuilder, RelationSlot, RelationValue, Relationship, Result, Row, RowId,
    SequenceKeyGenerator, SqlCommand, ValidationError, Value, ValueType, object_ref, read_as,
    write_as,
};

pub use relmap_macros::Record;

pub use relmap_query::{
    AggregateFunctions, AggregateResult, ColumnMapper, Direction, FetchHint, LIKE_WILDCARD,
    Operator, Predicate, QuerySpecification, RowMapper, Select, SortOrdering,
    SqlGenerationContext, sort_objects, sorted_objects,
};

pub use relmap_session::{
    CacheConfig, Clock, CommitSummary, ConflictPolicy, Connector, Context, ContextBuilder,
    ContextConfig, ContextDelegate, ContextGroup, ContextGroups, EntityCache, EntityId,
    GroupMembership, ManualClock, NoDelegate, Operation, OperationKind, Snapshot, SystemClock,
};

/// Module access to the sub-crates, for the less common items.
pub mod query {
    pub use relmap_query::*;
}

pub mod session {
    pub use relmap_session::*;
}

#[cfg(feature = "memory")]
pub mod memory {
    pub use relmap_memory::*;
}

#[cfg(feature = "memory")]
pub use relmap_memory::{MemoryConfig, MemoryConnection, MemoryDatabase};

/// Everything an application usually needs, in one import.
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::{
        // Schema
        CacheStrategy,
        // Unit of work
        CommitSummary,
        // Capabilities
        Connection,
        Context,
        ContextConfig,
        ContextDelegate,
        Entity,
        Error,
        Faulting,
        Field,
        FieldAccess,
        Inheritance,
        LockingStrategy,
        Model,
        ObjectRef,
        // Queries
        Predicate,
        QuerySpecification,
        Record,
        RecordEvents,
        Registry,
        Relationship,
        Result,
        Row,
        RowId,
        SortOrdering,
        ValidationError,
        Value,
        ValueType,
        object_ref,
        read_as,
        write_as,
    };

    #[cfg(feature = "memory")]
    pub use crate::MemoryDatabase;
}

// ============================================================================
// Derive Support Tests
// ============================================================================
//
// These tests check that `#[derive(Record)]` produces a working accessor
// table for the field shapes applications use: renamed keys, optional
// scalars, relationship slots, skipped fields and generic markers.
