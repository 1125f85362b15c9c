//! Entity metadata and SQL command builders.
//!
//! An [`Entity`] describes how one mapped type lands in one table: its
//! ordered fields, relationships, locking and cache strategies and optional
//! inheritance parent. Entities are assembled with a builder and frozen by
//! the [`Registry`](crate::model::Registry).
//!
//! ```ignore
//! let user = Entity::new::<User>("User", "users")
//!     .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
//!     .field(Field::new("name", "NAME", ValueType::Text))
//!     .field(Field::new("version", "VERSION", ValueType::Integer).lock(true))
//!     .relationship(Relationship::to_many("posts", "Post", "id", "author_id"))
//!     .key_generator(SequenceKeyGenerator::new("users_seq"));
//! ```

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::access::{Assign, ObjectRef, Record, object_ref};
use crate::error::{Error, Result, TypeError};
use crate::field::Field;
use crate::keygen::PrimaryKeyGenerator;
use crate::relationship::{Inheritance, Relationship};
use crate::row::Row;
use crate::row_id::RowId;
use crate::value::Value;

/// How concurrent modification of a row is guarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockingStrategy {
    /// Lock-participant columns are re-checked in the WHERE clause.
    #[default]
    Optimistic,
    /// The connection's isolation level is raised around the statement.
    Pessimistic,
    /// Handled like `Pessimistic`.
    File,
}

impl LockingStrategy {
    pub const fn widens_isolation(&self) -> bool {
        matches!(self, LockingStrategy::Pessimistic | LockingStrategy::File)
    }
}

/// How long a materialized object stays in the object cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStrategy {
    /// Never cached.
    None,
    /// Fixed short TTL.
    #[default]
    Normal,
    /// TTL derived from recent cache write intervals.
    Statistical,
    /// Roughly a day.
    DistantFuture,
}

type Factory = Arc<dyn Fn() -> ObjectRef + Send + Sync>;

/// A rendered statement plus the column values it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCommand {
    pub entity: String,
    pub sql: String,
    /// Column name to value for every field of the object.
    pub row: BTreeMap<String, Value>,
}

/// Metadata describing how a domain type maps to a table.
#[derive(Clone)]
pub struct Entity {
    pub name: String,
    pub table: String,
    pub locking: LockingStrategy,
    pub cache_strategy: CacheStrategy,
    pub inheritance: Option<Inheritance>,
    fields: Vec<Field>,
    relationships: Vec<Relationship>,
    field_by_key: HashMap<String, usize>,
    field_by_column: HashMap<String, usize>,
    relationship_by_name: HashMap<String, usize>,
    key_generator: Option<Arc<dyn PrimaryKeyGenerator>>,
    type_id: Option<TypeId>,
    factory: Option<Factory>,
    pub(crate) descendants: Vec<String>,
}

impl Entity {
    /// A concrete entity backed by the Rust type `T`.
    pub fn new<T: Record + Default>(name: impl Into<String>, table: impl Into<String>) -> Self {
        let mut entity = Self::abstract_entity(name, table);
        entity.type_id = Some(TypeId::of::<T>());
        entity.factory = Some(Arc::new(|| object_ref(T::default())));
        entity
    }

    /// An entity that is never instantiated, only queried through its
    /// concrete descendants.
    pub fn abstract_entity(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            locking: LockingStrategy::default(),
            cache_strategy: CacheStrategy::default(),
            inheritance: None,
            fields: Vec::new(),
            relationships: Vec::new(),
            field_by_key: HashMap::new(),
            field_by_column: HashMap::new(),
            relationship_by_name: HashMap::new(),
            key_generator: None,
            type_id: None,
            factory: None,
            descendants: Vec::new(),
        }
    }

    /// Add a field. A field with an existing key replaces the old one.
    pub fn field(mut self, field: Field) -> Self {
        self.push_field(field);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        match self.relationship_by_name.get(&relationship.name) {
            Some(&index) => self.relationships[index] = relationship,
            None => {
                self.relationship_by_name
                    .insert(relationship.name.clone(), self.relationships.len());
                self.relationships.push(relationship);
            }
        }
        self
    }

    pub fn locking(mut self, locking: LockingStrategy) -> Self {
        self.locking = locking;
        self
    }

    pub fn cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self
    }

    pub fn inheritance(mut self, inheritance: Inheritance) -> Self {
        self.inheritance = Some(inheritance);
        self
    }

    pub fn key_generator(mut self, generator: impl PrimaryKeyGenerator + 'static) -> Self {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    fn push_field(&mut self, field: Field) {
        match self.field_by_key.get(&field.key) {
            Some(&index) => {
                self.field_by_column.remove(&self.fields[index].column);
                self.field_by_column.insert(field.column.clone(), index);
                self.fields[index] = field;
            }
            None => {
                let index = self.fields.len();
                self.field_by_key.insert(field.key.clone(), index);
                self.field_by_column.insert(field.column.clone(), index);
                self.fields.push(field);
            }
        }
    }

    /// Copy parent fields this entity does not declare itself.
    pub(crate) fn inherit_fields(&mut self, parent_fields: &[Field]) {
        for field in parent_fields {
            if !self.field_by_key.contains_key(&field.key) {
                self.push_field(field.clone());
            }
        }
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Field by property key.
    pub fn field_named(&self, key: &str) -> Option<&Field> {
        self.field_by_key.get(key).map(|&i| &self.fields[i])
    }

    pub fn field_with_column(&self, column: &str) -> Option<&Field> {
        self.field_by_column.get(column).map(|&i| &self.fields[i])
    }

    pub fn relationship_named(&self, name: &str) -> Option<&Relationship> {
        self.relationship_by_name
            .get(name)
            .map(|&i| &self.relationships[i])
    }

    pub fn primary_key_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    /// First primary-key field.
    pub fn primary_key_field(&self) -> Option<&Field> {
        self.primary_key_fields().next()
    }

    pub fn has_composite_primary_key(&self) -> bool {
        self.primary_key_fields().count() > 1
    }

    pub fn lock_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.lock)
    }

    pub fn is_abstract(&self) -> bool {
        self.factory.is_none()
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    pub fn generator(&self) -> Option<&dyn PrimaryKeyGenerator> {
        self.key_generator.as_deref()
    }

    /// Names of every concrete entity below this one, depth first.
    pub fn concrete_descendants(&self) -> &[String] {
        &self.descendants
    }

    /// Comma-separated column list.
    pub fn column_names(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.column.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Discriminator equality for single-table children.
    pub fn discriminator(&self) -> Option<(&str, &str)> {
        self.inheritance.as_ref().and_then(Inheritance::discriminator)
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// A fresh default instance, or `None` for abstract entities.
    pub fn create_instance(&self) -> Option<ObjectRef> {
        self.factory.as_ref().map(|factory| factory())
    }

    /// Primary-key tuple read off the object, coerced to the declared
    /// types so it keys the same identity as [`Self::primary_key_for_row`].
    pub fn primary_key_for_object(&self, object: &dyn Record) -> RowId {
        self.primary_key_fields()
            .map(|f| {
                let raw = object.get_value(&f.key).unwrap_or(Value::Null);
                (f.key.clone(), f.coerce_value(&raw))
            })
            .collect()
    }

    /// `value` coerced to the declared type of the field keyed `key`.
    /// Unknown keys pass through unchanged.
    pub fn coerce_key_value(&self, key: &str, value: &Value) -> Value {
        match self.field_named(key) {
            Some(field) => field.coerce_value(value),
            None => value.clone(),
        }
    }

    /// A caller-built primary-key tuple in declared types.
    pub fn coerce_primary_key(&self, pk: &RowId) -> RowId {
        pk.iter()
            .map(|(key, value)| (key.to_string(), self.coerce_key_value(key, value)))
            .collect()
    }

    /// Assign every component of `pk` onto the object.
    pub fn set_primary_key_for_object(&self, pk: &RowId, object: &mut dyn Record) -> bool {
        let mut all = true;
        for (key, value) in pk.iter() {
            let value = self.coerce_key_value(key, value);
            if !object.set_value(key, value).is_applied() {
                tracing::warn!(entity = %self.name, key = key, "could not assign primary key");
                all = false;
            }
        }
        all
    }

    /// Primary-key tuple of a fetched row, coerced to the declared types.
    pub fn primary_key_for_row(&self, row: &Row) -> RowId {
        self.primary_key_fields()
            .map(|f| {
                let raw = row.get_by_name(&f.column).unwrap_or(&Value::Null);
                (f.key.clone(), f.coerce_value(raw))
            })
            .collect()
    }

    /// Populate every field from a row.
    ///
    /// Columns missing from the row and properties missing from the object
    /// are logged and skipped. A value the object refuses is an error.
    pub fn populate(&self, object: &mut dyn Record, row: &Row) -> Result<()> {
        for field in &self.fields {
            let Some(raw) = row.get_by_name(&field.column) else {
                tracing::warn!(entity = %self.name, column = %field.column, "row has no such column");
                continue;
            };
            match object.set_value(&field.key, field.coerce_value(raw)) {
                Assign::Applied => {}
                Assign::UnknownKey => {
                    tracing::warn!(
                        entity = %self.name,
                        key = %field.key,
                        "instance does not have this property"
                    );
                }
                Assign::Rejected(e) => {
                    return Err(Error::Type(TypeError {
                        expected: "assignable value",
                        actual: e.to_string(),
                        column: Some(field.column.clone()),
                    }));
                }
            }
        }
        Ok(())
    }

    /// Write the discriminator value for single-table children.
    pub fn stamp_discriminator(&self, object: &mut dyn Record) {
        if let Some((key, value)) = self.discriminator() {
            let value = Value::Text(value.to_string());
            let value = match self.field_named(key) {
                Some(field) => field.coerce_value(&value),
                None => value,
            };
            if !object.set_value(key, value).is_applied() {
                tracing::warn!(entity = %self.name, key = key, "could not stamp discriminator");
            }
        }
    }

    /// Column to value for every field of the object.
    pub fn row_for_object(&self, object: &dyn Record) -> BTreeMap<String, Value> {
        self.fields
            .iter()
            .map(|f| {
                (
                    f.column.clone(),
                    object.get_value(&f.key).unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    // ========================================================================
    // SQL commands
    // ========================================================================

    /// `INSERT INTO t (a,b) values (x,y)`, skipping read-only fields.
    pub fn create_insert_command(&self, object: &dyn Record) -> SqlCommand {
        let (columns, values): (Vec<&str>, Vec<String>) = self
            .fields
            .iter()
            .filter(|f| !f.read_only)
            .map(|f| {
                let value = object.get_value(&f.key).unwrap_or(Value::Null);
                (f.column.as_str(), value.to_sql_literal())
            })
            .unzip();
        let sql = format!(
            "INSERT INTO {} ({}) values ({})",
            self.table,
            columns.join(","),
            values.join(",")
        );
        self.command(sql, object)
    }

    /// `UPDATE t SET c=v,... WHERE <key and lock conjuncts>`.
    pub fn create_update_command(&self, object: &dyn Record) -> SqlCommand {
        let assignments = self
            .fields
            .iter()
            .filter(|f| !f.primary_key && !f.read_only)
            .map(|f| {
                let value = object.get_value(&f.key).unwrap_or(Value::Null);
                format!("{}={}", f.column, value.to_sql_literal())
            })
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table,
            assignments,
            self.where_clause(object)
        );
        self.command(sql, object)
    }

    /// `DELETE FROM t WHERE <key and lock conjuncts>`.
    pub fn create_delete_command(&self, object: &dyn Record) -> SqlCommand {
        let sql = format!("DELETE FROM {} WHERE {}", self.table, self.where_clause(object));
        self.command(sql, object)
    }

    /// One equality per primary-key field, plus one per lock field under
    /// optimistic locking, each bound to the object's current value.
    pub fn where_clause(&self, object: &dyn Record) -> String {
        let lock_fields: Vec<&Field> = if self.locking == LockingStrategy::Optimistic {
            self.lock_fields().filter(|f| !f.primary_key).collect()
        } else {
            Vec::new()
        };
        self.primary_key_fields()
            .chain(lock_fields)
            .map(|f| match object.get_value(&f.key).unwrap_or(Value::Null) {
                Value::Null => format!("{} IS NULL", f.column),
                value => format!("{}={}", f.column, value.to_sql_literal()),
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn command(&self, sql: String, object: &dyn Record) -> SqlCommand {
        SqlCommand {
            entity: self.name.clone(),
            sql,
            row: self.row_for_object(object),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("locking", &self.locking)
            .field("cache_strategy", &self.cache_strategy)
            .field("inheritance", &self.inheritance)
            .field("fields", &self.fields)
            .field("relationships", &self.relationships)
            .field("abstract", &self.is_abstract())
            .finish_non_exhaustive()
    }
}
