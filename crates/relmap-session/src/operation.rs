//! Pending mutations and their execution protocols.
//!
//! An [`Operation`] binds one verb to one object and its entity. The
//! [`Updater`](crate::Updater) batches them; this module runs each one
//! against the session once the batch is drained.
//!
//! # Protocols
//!
//! - **Insert**: assign a generated primary key if the object has none,
//!   stamp the discriminator of single-table children, execute, then record
//!   a snapshot and cache the object under its identity.
//! - **Update**: execute (with a widened isolation level under pessimistic
//!   locking), then overwrite the snapshot.
//! - **Delete**: unless vetoed, execute and cascade across loaded
//!   relationships: owned destinations are deleted, others get their
//!   destination key nulled and are updated. The snapshot and cache entry
//!   are dropped last.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use relmap_core::access::{read, set_value, write};
use relmap_core::{
    ConflictError, Entity, Error, Faulting, LockingStrategy, ObjectRef, Registry, RelationValue,
    Result, RowId, SchemaErrorKind, Value,
};

use crate::config::ConflictPolicy;
use crate::delegate::ContextDelegate;
use crate::entity_id::EntityId;
use crate::session::Session;
use crate::updater::CommitSummary;

/// The verb of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Insert => "Insert",
            OperationKind::Update => "Update",
            OperationKind::Delete => "Delete",
        })
    }
}

/// An intended mutation of one object.
#[derive(Clone)]
pub struct Operation {
    kind: OperationKind,
    object: ObjectRef,
    entity: String,
    recorded_at: Instant,
    sequence: u64,
}

impl Operation {
    pub(crate) fn new(
        kind: OperationKind,
        object: ObjectRef,
        entity: impl Into<String>,
        recorded_at: Instant,
        sequence: u64,
    ) -> Self {
        Self {
            kind,
            object,
            entity: entity.into(),
            recorded_at,
            sequence,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn recorded_at(&self) -> Instant {
        self.recorded_at
    }

    /// Recording order within the ledger; breaks timestamp ties.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Is this operation about `object` as an instance of `entity`?
    pub fn targets(&self, object: &ObjectRef, entity: &str) -> bool {
        Arc::ptr_eq(&self.object, object) && self.entity == entity
    }

    pub(crate) fn touch(&mut self, recorded_at: Instant, sequence: u64) {
        self.recorded_at = recorded_at;
        self.sequence = sequence;
    }

    pub(crate) fn execute(&self, ex: &mut Executor<'_>) -> Result<()> {
        let entity = ex.entity(&self.entity)?;
        match self.kind {
            OperationKind::Insert => insert(ex, entity, &self.object),
            OperationKind::Update => update(ex, entity, &self.object),
            OperationKind::Delete => delete(ex, entity, &self.object),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {{entity={}; object={:?}; sequence={}}}",
            self.kind,
            self.entity,
            &*read(&self.object),
            self.sequence
        )
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("entity", &self.entity)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Everything a running batch needs from its ledger and context.
pub(crate) struct Executor<'a> {
    registry: &'a Registry,
    session: &'a mut Session,
    delegate: &'a dyn ContextDelegate,
    conflict_policy: ConflictPolicy,
    summary: CommitSummary,
    /// Snapshots written by this batch, with whether the row was inserted.
    touched: Vec<(EntityId, bool)>,
    deleting: Vec<ObjectRef>,
    /// Rows deleted by this batch; evicted only once the batch commits.
    deleted: Vec<EntityId>,
}

/// What a finished batch leaves for its ledger to settle.
pub(crate) struct BatchEffects {
    pub summary: CommitSummary,
    pub touched: Vec<(EntityId, bool)>,
    pub deleted: Vec<EntityId>,
}

impl<'a> Executor<'a> {
    pub fn new(
        registry: &'a Registry,
        session: &'a mut Session,
        delegate: &'a dyn ContextDelegate,
        conflict_policy: ConflictPolicy,
    ) -> Self {
        Self {
            registry,
            session,
            delegate,
            conflict_policy,
            summary: CommitSummary::default(),
            touched: Vec::new(),
            deleting: Vec::new(),
            deleted: Vec::new(),
        }
    }

    /// Counts, touched snapshots and deleted rows, releasing the session borrow.
    pub fn finish(self) -> BatchEffects {
        BatchEffects {
            summary: self.summary,
            touched: self.touched,
            deleted: self.deleted,
        }
    }

    fn entity(&self, name: &str) -> Result<&'a Entity> {
        let registry = self.registry;
        registry.entity_named(name).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::NotFound,
                format!("entity '{}' is not registered", name),
            )
        })
    }

    fn conflict(&mut self, entity: &Entity, sql: &str) -> Result<()> {
        match self.conflict_policy {
            ConflictPolicy::Report => {
                tracing::warn!(entity = %entity.name, sql = %sql, "optimistic conflict: no row matched");
                self.summary.conflicts += 1;
                Ok(())
            }
            ConflictPolicy::Raise => Err(ConflictError {
                entity: entity.name.clone(),
                sql: sql.to_string(),
            }
            .into()),
        }
    }

    fn identity_of(&mut self, entity: &Entity, object: &ObjectRef) -> EntityId {
        let pk = entity.primary_key_for_object(&*read(object));
        self.session.obtain_entity_id(entity, pk)
    }
}

fn insert(ex: &mut Executor<'_>, entity: &Entity, object: &ObjectRef) -> Result<()> {
    read(object).validate_for_save().map_err(Error::Validation)?;

    let mut pk = entity.primary_key_for_object(&*read(object));
    if pk.has_null() && !entity.has_composite_primary_key() {
        if let (Some(generator), Some(field)) = (entity.generator(), entity.primary_key_field()) {
            match generator.next_primary_key(entity, ex.session.connection_mut()) {
                Ok(Some(value)) => {
                    let generated = RowId::single(&field.key, field.coerce_value(&value));
                    entity.set_primary_key_for_object(&generated, &mut *write(object));
                    pk = entity.primary_key_for_object(&*read(object));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(entity = %entity.name, error = %e, "primary key generation failed");
                    return Err(e);
                }
            }
        }
    }
    if pk.has_null() {
        tracing::error!(entity = %entity.name, "no primary key for object; insert skipped");
        return Ok(());
    }

    if entity
        .inheritance
        .as_ref()
        .is_some_and(|inheritance| inheritance.is_single_table())
        && ex.registry.parent_entity(entity).is_some()
    {
        entity.stamp_discriminator(&mut *write(object));
    }

    let command = entity.create_insert_command(&*read(object));
    ex.session.execute_update(&command.sql)?;

    write(object).awake_from_insert();
    ex.delegate.awake_from_insert(object, entity);

    let id = ex.session.obtain_entity_id(entity, pk);
    ex.session.record_snapshot(id.clone(), command.row);
    ex.session.cache_object(&id, object.clone());
    ex.touched.push((id, true));
    ex.summary.inserted += 1;
    Ok(())
}

fn update(ex: &mut Executor<'_>, entity: &Entity, object: &ObjectRef) -> Result<()> {
    read(object).validate_for_save().map_err(Error::Validation)?;
    ex.delegate.will_update(object, entity);
    write_row(ex, entity, object)
}

/// Execute the UPDATE for `object` and refresh its snapshot.
fn write_row(ex: &mut Executor<'_>, entity: &Entity, object: &ObjectRef) -> Result<()> {
    let command = entity.create_update_command(&*read(object));
    let affected = if entity.locking.widens_isolation() {
        let mut guard = ex.session.widen_isolation()?;
        tracing::debug!(entity = %entity.name, sql = %command.sql, "executing locked update");
        guard.execute(&command.sql)?
    } else {
        ex.session.execute_update(&command.sql)?
    };
    if affected == 0 && entity.locking == LockingStrategy::Optimistic {
        return ex.conflict(entity, &command.sql);
    }

    ex.delegate.did_update(object, entity);
    let id = ex.identity_of(entity, object);
    ex.session.update_snapshot(id.clone(), command.row);
    ex.touched.push((id, false));
    ex.summary.updated += 1;
    Ok(())
}

fn delete(ex: &mut Executor<'_>, entity: &Entity, object: &ObjectRef) -> Result<()> {
    read(object).validate_for_delete().map_err(Error::Validation)?;
    if !ex.delegate.should_delete(object, entity) {
        tracing::debug!(entity = %entity.name, "delete vetoed by delegate");
        ex.summary.vetoed += 1;
        return Ok(());
    }
    delete_object(ex, entity, object)
}

fn delete_object(ex: &mut Executor<'_>, entity: &Entity, object: &ObjectRef) -> Result<()> {
    if ex.deleting.iter().any(|o| Arc::ptr_eq(o, object)) {
        return Ok(());
    }
    ex.deleting.push(object.clone());
    let registry = ex.registry;

    ex.delegate.will_delete(object, entity);
    let command = entity.create_delete_command(&*read(object));
    let affected = ex.session.execute_update(&command.sql)?;
    if affected == 0 && entity.locking == LockingStrategy::Optimistic {
        return ex.conflict(entity, &command.sql);
    }

    for relationship in entity.relationships() {
        let targets = match read(object).relation(&relationship.name) {
            Some(RelationValue::ToOne(Some(target))) => vec![target],
            Some(RelationValue::ToMany(Faulting::Loaded(targets))) => targets,
            _ => continue,
        };
        if targets.is_empty() {
            continue;
        }
        let Some(destination) = registry.destination_entity(entity, relationship) else {
            continue;
        };

        if relationship.owns_destination {
            for target in &targets {
                delete_object(ex, destination, target)?;
            }
        } else if destination
            .field_named(&relationship.destination_key)
            .is_some_and(|field| field.primary_key)
        {
            tracing::debug!(
                entity = %entity.name,
                relationship = %relationship.name,
                "destination is referenced by its primary key; nothing to nullify"
            );
        } else {
            for target in &targets {
                set_value(target, &relationship.destination_key, Value::Null);
                ex.delegate.will_update(target, destination);
                write_row(ex, destination, target)?;
            }
        }
    }

    ex.delegate.did_delete(object, entity);
    let id = ex.identity_of(entity, object);
    ex.deleted.push(id);
    ex.summary.deleted += 1;
    Ok(())
}
