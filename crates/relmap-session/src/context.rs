//! The working scope callers hold.
//!
//! A [`Context`] owns one ledger per model it has touched: a [`Session`]
//! (connection, identities, snapshots, object cache) plus an [`Updater`]
//! (pending operations). Ledgers open lazily through the [`Connector`] the
//! context was built with, so a context that only ever reads one model
//! never opens a connection for another.
//!
//! Nothing is global. Code that needs "the current unit of work" takes a
//! `&mut Context`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use relmap_core::access::{get_value, read, set_value, write};
use relmap_core::{
    Connection, Entity, Error, Faulting, Model, ObjectRef, Registry, RelationSlot, RelationValue,
    Relationship, Result, Row, RowId, SchemaErrorKind, Value,
};
use relmap_query::{AggregateResult, Predicate, QuerySpecification, RowMapper};

use crate::cache::{Clock, EntityCache, SystemClock};
use crate::config::ContextConfig;
use crate::delegate::{ContextDelegate, NoDelegate};
use crate::entity_id::EntityId;
use crate::groups::{ContextGroups, GroupMembership};
use crate::operation::OperationKind;
use crate::query::Query;
use crate::session::Session;
use crate::snapshot::Snapshot;
use crate::updater::{CommitSummary, Updater};

/// Opens the connection for a model's data source.
///
/// Any `Fn(&Model) -> Result<Box<dyn Connection>>` closure is a connector.
pub trait Connector: Send + Sync {
    fn open(&self, model: &Model) -> Result<Box<dyn Connection>>;
}

impl<F> Connector for F
where
    F: Fn(&Model) -> Result<Box<dyn Connection>> + Send + Sync,
{
    fn open(&self, model: &Model) -> Result<Box<dyn Connection>> {
        self(model)
    }
}

struct Ledger {
    session: Session,
    updater: Updater,
}

/// Builder for [`Context`].
pub struct ContextBuilder {
    registry: Arc<Registry>,
    connector: Arc<dyn Connector>,
    delegate: Arc<dyn ContextDelegate>,
    config: ContextConfig,
    clock: Arc<dyn Clock>,
    membership: Option<GroupMembership>,
}

impl ContextBuilder {
    pub fn delegate(self, delegate: impl ContextDelegate + 'static) -> Self {
        self.shared_delegate(Arc::new(delegate))
    }

    pub fn shared_delegate(mut self, delegate: Arc<dyn ContextDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source for snapshots, operation timestamps and cache expiry.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Join `group` (or a private group for `None`) for the context's
    /// lifetime.
    pub fn group(mut self, groups: &ContextGroups, name: Option<&str>) -> Self {
        self.membership = Some(groups.join(name));
        self
    }

    pub fn build(self) -> Context {
        Context {
            registry: self.registry,
            connector: self.connector,
            ledgers: HashMap::new(),
            delegate: self.delegate,
            config: self.config,
            clock: self.clock,
            membership: self.membership,
        }
    }
}

/// One unit-of-work scope over every model of a registry.
///
/// ```ignore
/// let mut ctx = Context::builder(registry, connector).build();
/// let user = ctx.create("User")?;
/// write_as::<User, _>(&user, |u| u.name = "ada".into());
/// ctx.save_changes()?;
///
/// let admins = ctx.execute_query(&QuerySpecification::filter(
///     "User",
///     Predicate::eq("role", "admin"),
/// ))?;
/// ```
pub struct Context {
    registry: Arc<Registry>,
    connector: Arc<dyn Connector>,
    ledgers: HashMap<String, Ledger>,
    delegate: Arc<dyn ContextDelegate>,
    config: ContextConfig,
    clock: Arc<dyn Clock>,
    membership: Option<GroupMembership>,
}

impl Context {
    pub fn builder(registry: Arc<Registry>, connector: impl Connector + 'static) -> ContextBuilder {
        ContextBuilder {
            registry,
            connector: Arc::new(connector),
            delegate: Arc::new(NoDelegate),
            config: ContextConfig::default(),
            clock: Arc::new(SystemClock),
            membership: None,
        }
    }

    pub fn new(registry: Arc<Registry>, connector: impl Connector + 'static) -> Self {
        Self::builder(registry, connector).build()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn membership(&self) -> Option<&GroupMembership> {
        self.membership.as_ref()
    }

    /// The session of `model`, if the context has opened it.
    pub fn session(&self, model: &str) -> Option<&Session> {
        self.ledgers.get(model).map(|ledger| &ledger.session)
    }

    /// Object cache of `model`, for maintenance owners that sweep expired
    /// entries.
    pub fn cache_for(&self, model: &str) -> Option<Arc<EntityCache>> {
        self.session(model).map(|session| Arc::clone(session.cache()))
    }

    // ========================================================================
    // Recording changes
    // ========================================================================

    /// A fresh instance of `entity`, recorded for insertion.
    pub fn create(&mut self, entity: &str) -> Result<ObjectRef> {
        let registry = Arc::clone(&self.registry);
        let entity = registry.entity_named(entity).ok_or_else(|| not_found(entity))?;
        let object = entity.create_instance().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::Invalid,
                format!("entity '{}' is abstract", entity.name),
            )
        })?;
        self.insert(&object)?;
        Ok(object)
    }

    pub fn insert(&mut self, object: &ObjectRef) -> Result<()> {
        self.record(OperationKind::Insert, object)
    }

    pub fn update(&mut self, object: &ObjectRef) -> Result<()> {
        self.record(OperationKind::Update, object)
    }

    pub fn delete(&mut self, object: &ObjectRef) -> Result<()> {
        self.record(OperationKind::Delete, object)
    }

    /// Drop a pending insert. Returns whether one was pending.
    pub fn forget_insert(&mut self, object: &ObjectRef) -> bool {
        let registry = Arc::clone(&self.registry);
        let Ok(entity) = entity_of(&registry, object) else {
            return false;
        };
        let Some(model) = registry.model_for_entity(&entity.name) else {
            return false;
        };
        self.ledgers
            .get_mut(&model.name)
            .is_some_and(|ledger| ledger.updater.forget_insert(object, &entity.name))
    }

    pub fn has_changes(&self) -> bool {
        self.ledgers.values().any(|ledger| ledger.updater.has_changes())
    }

    /// Drop every pending operation without touching the database.
    pub fn discard_changes(&mut self) {
        for ledger in self.ledgers.values_mut() {
            ledger.updater.rollback(&mut ledger.session);
        }
    }

    /// Save every ledger with pending operations, in model order.
    ///
    /// Each ledger commits on its own; the first failure stops the save and
    /// leaves later ledgers pending.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn save_changes(&mut self) -> Result<CommitSummary> {
        let registry = Arc::clone(&self.registry);
        let mut total = CommitSummary::default();
        for model in registry.models() {
            let Some(ledger) = self.ledgers.get_mut(&model.name) else {
                continue;
            };
            if !ledger.updater.has_changes() {
                continue;
            }
            let summary = ledger.updater.save(
                &mut ledger.session,
                &registry,
                &*self.delegate,
                self.config.conflict_policy,
            )?;
            total.merge(summary);
        }
        if let Some(membership) = &self.membership {
            membership.group().record_save();
        }
        Ok(total)
    }

    fn record(&mut self, kind: OperationKind, object: &ObjectRef) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let entity = entity_of(&registry, object)?;
        let model = model_of(&registry, entity)?;
        let now = self.clock.now();
        self.ledger_mut(model)?
            .updater
            .record(kind, object, &entity.name, now);
        Ok(())
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Objects matching `spec`. An unknown entity yields nothing.
    pub fn execute_query(&mut self, spec: &QuerySpecification) -> Result<Vec<ObjectRef>> {
        let Some(model) = self.model_name_for(&spec.entity) else {
            tracing::warn!(entity = %spec.entity, "query for unknown entity");
            return Ok(Vec::new());
        };
        self.with_query(&model, |query| query.execute(spec))
    }

    /// Objects whose properties equal every given value.
    pub fn query_by_values<K, I>(&mut self, entity: &str, values: I) -> Result<Vec<ObjectRef>>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let spec = QuerySpecification::new(entity, Predicate::from_field_values(values));
        self.execute_query(&spec)
    }

    pub fn find_one(&mut self, entity: &str, predicate: Predicate) -> Result<Option<ObjectRef>> {
        let Some(model) = self.model_name_for(entity) else {
            tracing::warn!(entity = entity, "query for unknown entity");
            return Ok(None);
        };
        self.with_query(&model, |query| query.find_one(entity, predicate))
    }

    /// Fetch by a single-column primary key.
    pub fn find(&mut self, entity: &str, pk: impl Into<Value>) -> Result<Option<ObjectRef>> {
        let registry = Arc::clone(&self.registry);
        let Some(field) = registry
            .entity_named(entity)
            .and_then(|entity| entity.primary_key_field())
        else {
            tracing::warn!(entity = entity, "no single primary key to find by");
            return Ok(None);
        };
        self.find_by_id(entity, &RowId::single(&field.key, pk))
    }

    /// Fetch by a full primary-key tuple.
    pub fn find_by_id(&mut self, entity: &str, pk: &RowId) -> Result<Option<ObjectRef>> {
        match id_predicate(pk) {
            Some(predicate) => self.find_one(entity, predicate),
            None => Ok(None),
        }
    }

    /// The cached object for a primary key, fetching it on a miss.
    pub fn cached_object(&mut self, entity: &str, pk: &RowId) -> Result<Option<ObjectRef>> {
        let registry = Arc::clone(&self.registry);
        let Some(entity_meta) = registry.entity_named(entity) else {
            tracing::warn!(entity = entity, "lookup for unknown entity");
            return Ok(None);
        };
        let model = model_of(&registry, entity_meta)?;
        let session = &mut self.ledger_mut(model)?.session;
        let id = session.obtain_entity_id(entity_meta, pk.clone());
        if let Some(object) = session.cached_object(&id) {
            tracing::trace!(entity_id = %id, "cache hit");
            return Ok(Some(object));
        }
        self.find_by_id(entity, pk)
    }

    /// Register `object` in the identity cache under its primary key.
    ///
    /// Returns the identity, or `None` when the key is incomplete.
    pub fn cache(&mut self, object: &ObjectRef) -> Result<Option<EntityId>> {
        let registry = Arc::clone(&self.registry);
        let entity = entity_of(&registry, object)?;
        let model = model_of(&registry, entity)?;
        let pk = entity.primary_key_for_object(&*read(object));
        if pk.has_null() {
            tracing::warn!(entity = %entity.name, "cannot cache an object without primary key");
            return Ok(None);
        }
        let session = &mut self.ledger_mut(model)?.session;
        let id = session.obtain_entity_id(entity, pk);
        session.cache_object(&id, object.clone());
        Ok(Some(id))
    }

    /// Refresh `object` from its row, in place.
    ///
    /// The snapshot is forgotten first. Returns `false`, and drops the
    /// object from the cache, when the row no longer exists.
    pub fn reload(&mut self, object: &ObjectRef) -> Result<bool> {
        let registry = Arc::clone(&self.registry);
        let entity = entity_of(&registry, object)?;
        let model = model_of(&registry, entity)?;
        let pk = entity.primary_key_for_object(&*read(object));
        let Some(predicate) = id_predicate(&pk).filter(|_| !pk.has_null()) else {
            return Ok(false);
        };

        let id = {
            let session = &mut self.ledger_mut(model)?.session;
            let id = session.obtain_entity_id(entity, pk);
            session.forget_snapshot(&id);
            session.cache_object(&id, object.clone());
            id
        };
        let spec = QuerySpecification::filter(&entity.name, predicate)
            .force_refetch(true)
            .limit(1);
        let found = !self.with_query(model, |query| query.execute(&spec))?.is_empty();
        if !found {
            if let Some(ledger) = self.ledgers.get(model) {
                ledger.session.uncache(&id);
            }
            tracing::debug!(entity_id = %id, "reloaded row is gone");
        }
        Ok(found)
    }

    /// The object a snapshot describes: the cached instance if any, else a
    /// new one populated from the snapshot row without a query.
    pub fn object_from_snapshot(&mut self, snapshot: &Snapshot) -> Result<Option<ObjectRef>> {
        let registry = Arc::clone(&self.registry);
        let Some(entity) = registry.entity_named(snapshot.entity_id.entity()) else {
            return Ok(None);
        };
        let model = model_of(&registry, entity)?;
        let session = &mut self.ledger_mut(model)?.session;
        if let Some(object) = session.cached_object(&snapshot.entity_id) {
            return Ok(Some(object));
        }
        let Some(object) = entity.create_instance() else {
            return Ok(None);
        };
        let row = Row::from_pairs(snapshot.row.iter().map(|(k, v)| (k.clone(), v.clone())));
        entity.populate(&mut *write(&object), &row)?;
        session.cache_object(&snapshot.entity_id, object.clone());
        Ok(Some(object))
    }

    /// The canonical identity of `object`, if it has a complete key.
    pub fn entity_id_for_object(&mut self, object: &ObjectRef) -> Option<EntityId> {
        let registry = Arc::clone(&self.registry);
        let entity = entity_of(&registry, object).ok()?;
        let model = model_of(&registry, entity).ok()?;
        let pk = entity.primary_key_for_object(&*read(object));
        if pk.has_null() {
            return None;
        }
        let session = &mut self.ledger_mut(model).ok()?.session;
        Some(session.obtain_entity_id(entity, pk))
    }

    /// A recorded snapshot of `entity` whose row satisfies `predicate`.
    pub fn snapshot_for_predicate(&self, entity: &str, predicate: &Predicate) -> Option<Snapshot> {
        let entity = self.registry.entity_named(entity)?;
        let model = self.registry.model_for_entity(&entity.name)?;
        self.ledgers
            .get(&model.name)?
            .session
            .snapshot_for_predicate(entity, predicate)
            .cloned()
    }

    pub fn snapshot_for_values<K, I>(&self, entity: &str, values: I) -> Option<Snapshot>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let predicate = Predicate::from_field_values(values)?;
        self.snapshot_for_predicate(entity, &predicate)
    }

    /// Rows matching `spec` without building objects. Snapshots are
    /// recorded.
    pub fn raw_rows(&mut self, spec: &QuerySpecification) -> Result<Vec<Row>> {
        let Some(model) = self.model_name_for(&spec.entity) else {
            tracing::warn!(entity = %spec.entity, "query for unknown entity");
            return Ok(Vec::new());
        };
        self.with_query(&model, |query| query.raw_rows(spec))
    }

    /// SUM, COUNT, MIN, MAX and AVG of `key` over the rows matching
    /// `predicate`.
    pub fn execute_aggregate(
        &mut self,
        entity: &str,
        key: &str,
        predicate: Option<&Predicate>,
    ) -> Result<AggregateResult> {
        let Some(model) = self.model_name_for(entity) else {
            tracing::warn!(entity = entity, "aggregate over unknown entity");
            return Ok(AggregateResult::empty());
        };
        self.with_query(&model, |query| match query.entity(entity) {
            Some(entity) => query.aggregate(entity, key, predicate),
            None => Ok(AggregateResult::empty()),
        })
    }

    /// Run raw SQL on `model`'s connection and map every row. No snapshot is
    /// recorded.
    pub fn execute_sql<M: RowMapper>(
        &mut self,
        model: &str,
        sql: &str,
        mapper: &M,
    ) -> Result<Vec<M::Output>> {
        let session = &mut self.ledger_mut(model)?.session;
        session.establish_connection()?;
        session
            .execute_query(sql)?
            .iter()
            .map(|row| mapper.map_row(row))
            .collect()
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    /// The destination of a to-one relationship, loading it when unset.
    pub fn resolve_to_one(&mut self, object: &ObjectRef, relationship: &str) -> Result<Option<ObjectRef>> {
        let registry = Arc::clone(&self.registry);
        let entity = entity_of(&registry, object)?;
        let rel = relationship_of(entity, relationship)?;
        if let Some(RelationValue::ToOne(Some(target))) = read(object).relation(relationship) {
            return Ok(Some(target));
        }

        let model = model_of(&registry, entity)?;
        let target = self.with_query(model, |query| query.load_to_one(entity, object, rel))?;
        if let Some(RelationSlot::ToOne(slot)) = write(object).relation_slot(relationship) {
            *slot = target.clone();
        }
        Ok(target)
    }

    /// The contents of a to-many relationship, resolving its fault once.
    pub fn resolve_to_many(&mut self, object: &ObjectRef, relationship: &str) -> Result<Vec<ObjectRef>> {
        let registry = Arc::clone(&self.registry);
        let entity = entity_of(&registry, object)?;
        let rel = relationship_of(entity, relationship)?;
        if let Some(RelationValue::ToMany(Faulting::Loaded(objects))) =
            read(object).relation(relationship)
        {
            return Ok(objects);
        }

        let model = model_of(&registry, entity)?;
        let loaded = self.with_query(model, |query| query.load_to_many(entity, object, rel))?;
        let mut guard = write(object);
        match guard.relation_slot(relationship) {
            Some(RelationSlot::ToMany(slot)) => Ok(slot.resolve(|| Ok(loaded))?.to_vec()),
            _ => Ok(loaded),
        }
    }

    /// Link `target` to `owner` through `relationship` and its inverse,
    /// updating the foreign key and recording the changed row.
    ///
    /// For a to-many relationship the target's destination key takes the
    /// owner's source value; for a to-one relationship the owner's source
    /// key takes the target's destination value.
    pub fn add_to_both_sides(
        &mut self,
        owner: &ObjectRef,
        relationship: &str,
        target: &ObjectRef,
    ) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let entity = entity_of(&registry, owner)?;
        let rel = relationship_of(entity, relationship)?;
        let inverse = registry
            .destination_entity(entity, rel)
            .and_then(|destination| inverse_of(destination, entity));

        if rel.is_to_many() {
            let value = get_value(owner, &rel.source_key).unwrap_or(Value::Null);
            set_value(target, &rel.destination_key, value);
            if let Some(RelationSlot::ToMany(slot)) = write(owner).relation_slot(&rel.name) {
                slot.push(target.clone());
            }
        } else {
            let value = get_value(target, &rel.destination_key).unwrap_or(Value::Null);
            set_value(owner, &rel.source_key, value);
            if let Some(RelationSlot::ToOne(slot)) = write(owner).relation_slot(&rel.name) {
                *slot = Some(target.clone());
            }
        }
        if let Some(inverse) = inverse {
            match write(target).relation_slot(&inverse.name) {
                Some(RelationSlot::ToOne(slot)) => *slot = Some(owner.clone()),
                Some(RelationSlot::ToMany(slot)) => slot.push(owner.clone()),
                None => {}
            }
        }

        self.update(if rel.is_to_many() { target } else { owner })
    }

    /// Undo [`add_to_both_sides`](Self::add_to_both_sides). An owned
    /// target is deleted instead of updated.
    pub fn remove_from_both_sides(
        &mut self,
        owner: &ObjectRef,
        relationship: &str,
        target: &ObjectRef,
    ) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let entity = entity_of(&registry, owner)?;
        let rel = relationship_of(entity, relationship)?;
        let inverse = registry
            .destination_entity(entity, rel)
            .and_then(|destination| inverse_of(destination, entity));

        if rel.is_to_many() {
            if let Some(RelationSlot::ToMany(slot)) = write(owner).relation_slot(&rel.name) {
                slot.remove(target);
            }
            set_value(target, &rel.destination_key, Value::Null);
        } else {
            if let Some(RelationSlot::ToOne(slot)) = write(owner).relation_slot(&rel.name) {
                *slot = None;
            }
            set_value(owner, &rel.source_key, Value::Null);
        }
        if let Some(inverse) = inverse {
            match write(target).relation_slot(&inverse.name) {
                Some(RelationSlot::ToOne(slot)) => *slot = None,
                Some(RelationSlot::ToMany(slot)) => {
                    slot.remove(owner);
                }
                None => {}
            }
        }

        if !rel.is_to_many() {
            self.update(owner)?;
        }
        if rel.owns_destination {
            self.delete(target)
        } else if rel.is_to_many() {
            self.update(target)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Ledgers
    // ========================================================================

    /// Close every open connection and drop identities, snapshots, caches
    /// and pending operations.
    pub fn disconnect(&mut self) {
        for (_, mut ledger) in self.ledgers.drain() {
            ledger.updater.clear();
            ledger.session.disconnect();
        }
    }

    fn model_name_for(&self, entity: &str) -> Option<String> {
        self.registry
            .model_for_entity(entity)
            .map(|model| model.name.clone())
    }

    fn ledger_mut(&mut self, model: &str) -> Result<&mut Ledger> {
        match self.ledgers.entry(model.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let info = self.registry.model_named(model).ok_or_else(|| {
                    Error::schema(
                        SchemaErrorKind::NotFound,
                        format!("model '{}' is not registered", model),
                    )
                })?;
                let connection = self.connector.open(info)?;
                let cache = Arc::new(EntityCache::with_clock(self.config.cache, Arc::clone(&self.clock)));
                let session = Session::new(model, connection, cache, Arc::clone(&self.clock));
                tracing::debug!(model = model, "ledger opened");
                Ok(entry.insert(Ledger {
                    session,
                    updater: Updater::new(self.config.auto_commit),
                }))
            }
        }
    }

    fn with_query<R>(&mut self, model: &str, f: impl FnOnce(&mut Query<'_>) -> Result<R>) -> Result<R> {
        let registry = Arc::clone(&self.registry);
        let delegate = Arc::clone(&self.delegate);
        let ledger = self.ledger_mut(model)?;
        let mut query = Query::new(&registry, &mut ledger.session, &*delegate);
        f(&mut query)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        for ledger in self.ledgers.values_mut() {
            ledger.session.disconnect();
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("models", &self.ledgers.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("has_changes", &self.has_changes())
            .finish_non_exhaustive()
    }
}

fn not_found(entity: &str) -> Error {
    Error::schema(
        SchemaErrorKind::NotFound,
        format!("entity '{}' is not registered", entity),
    )
}

fn entity_of<'r>(registry: &'r Registry, object: &ObjectRef) -> Result<&'r Entity> {
    let type_id = read(object).as_any().type_id();
    registry.entity_for_type(type_id).ok_or_else(|| {
        Error::schema(
            SchemaErrorKind::NotFound,
            format!("no entity is mapped to {:?}", &*read(object)),
        )
    })
}

fn model_of<'r>(registry: &'r Registry, entity: &Entity) -> Result<&'r str> {
    registry
        .model_for_entity(&entity.name)
        .map(|model| model.name.as_str())
        .ok_or_else(|| not_found(&entity.name))
}

fn relationship_of<'e>(entity: &'e Entity, name: &str) -> Result<&'e Relationship> {
    entity.relationship_named(name).ok_or_else(|| {
        Error::schema(
            SchemaErrorKind::NotFound,
            format!("entity '{}' has no relationship '{}'", entity.name, name),
        )
    })
}

/// The first relationship of `destination` leading back to `source`.
fn inverse_of<'e>(destination: &'e Entity, source: &Entity) -> Option<&'e Relationship> {
    destination
        .relationships()
        .iter()
        .find(|rel| rel.destination == source.name)
}

fn id_predicate(pk: &RowId) -> Option<Predicate> {
    Predicate::from_field_values(pk.iter().map(|(key, value)| (key, value.clone())))
}
