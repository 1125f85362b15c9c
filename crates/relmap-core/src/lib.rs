//! Core types and traits for relmap.
//!
//! This crate provides the foundations the query and session layers build on:
//!
//! - [`Value`] and [`Row`] for data exchanged with a database
//! - [`Connection`], the capability a driver implements
//! - the schema registry: [`Entity`], [`Field`], [`Relationship`],
//!   [`Inheritance`], [`Model`] and [`Registry`]
//! - [`FieldAccess`] / [`Record`], the per-type property accessor table
//! - [`Faulting`], the lazy to-many relationship value
//! - primary-key generators

pub mod access;
pub mod connection;
pub mod entity;
pub mod error;
pub mod field;
pub mod keygen;
pub mod lazy;
pub mod model;
pub mod pattern;
pub mod relationship;
pub mod row;
pub mod row_id;
pub mod types;
pub mod value;

pub use access::{
    Assign, FieldAccess, ObjectRef, Record, RecordEvents, RelationSlot, RelationValue, object_ref,
    read_as, write_as,
};
pub use connection::{Connection, IsolationLevel};
pub use entity::{CacheStrategy, Entity, LockingStrategy, SqlCommand};
pub use error::{
    CommitError, ConflictError, ConnectionError, ConnectionErrorKind, Error, QueryError,
    QueryErrorKind, Result, SchemaError, SchemaErrorKind, TypeError, ValidationError,
};
pub use field::Field;
pub use keygen::{IncrementKeyGenerator, PrimaryKeyGenerator, SequenceKeyGenerator};
pub use lazy::Faulting;
pub use model::{ConnectionInfo, Model, Registry, RegistryBuilder};
pub use relationship::{Inheritance, InheritanceKind, Multiplicity, Relationship};
pub use row::Row;
pub use row_id::RowId;
pub use types::ValueType;
pub use value::Value;
