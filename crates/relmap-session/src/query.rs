//! Fetching and materializing objects.
//!
//! A [`Query`] borrows one session and turns query specifications into
//! live objects. Every fetched row goes through the same steps: compute its
//! primary key, obtain the canonical [`EntityId`], record the snapshot, then
//! reuse the cached instance or build a new one and wire its
//! relationships.
//!
//! Objects are cached before their relationships are wired, so a prefetch
//! that leads back to an object already being materialized finds it in the
//! cache instead of fetching it again.
//!
//! Querying an abstract entity fans out over its concrete descendants. Each
//! descendant is queried on its own and the results are concatenated in
//! descendant order; sort orderings apply within each descendant only.

use relmap_core::access::{get_value, write};
use relmap_core::{Entity, ObjectRef, Registry, RelationSlot, Relationship, Result, Row, Value};
use relmap_query::{AggregateFunctions, AggregateResult, Predicate, QuerySpecification, Select};

use crate::delegate::ContextDelegate;
use crate::session::Session;

/// The fetch engine over one session.
pub(crate) struct Query<'a> {
    registry: &'a Registry,
    session: &'a mut Session,
    delegate: &'a dyn ContextDelegate,
}

impl<'a> Query<'a> {
    pub fn new(
        registry: &'a Registry,
        session: &'a mut Session,
        delegate: &'a dyn ContextDelegate,
    ) -> Self {
        Self {
            registry,
            session,
            delegate,
        }
    }

    pub fn entity(&self, name: &str) -> Option<&'a Entity> {
        let registry = self.registry;
        registry.entity_named(name)
    }

    /// Objects matching `spec`, in row order per queried entity.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = %spec.entity))]
    pub fn execute(&mut self, spec: &QuerySpecification) -> Result<Vec<ObjectRef>> {
        let Some(entity) = self.entity(&spec.entity) else {
            tracing::warn!(entity = %spec.entity, "query for unknown entity");
            return Ok(Vec::new());
        };
        self.session.establish_connection()?;

        let mut objects = Vec::new();
        for target in self.targets(entity) {
            let predicate = Predicate::with_inheritance(target, spec.predicate.clone());
            let target_spec = spec.retarget(&target.name, predicate);
            objects.extend(self.execute_for_entity(target, &target_spec)?);
        }
        Ok(objects)
    }

    /// First object matching `predicate`.
    pub fn find_one(&mut self, entity: &str, predicate: Predicate) -> Result<Option<ObjectRef>> {
        let spec = QuerySpecification::filter(entity, predicate).limit(1);
        Ok(self.execute(&spec)?.into_iter().next())
    }

    /// Raw rows matching `spec`. Rows with a complete primary key get a
    /// snapshot; no object is built.
    pub fn raw_rows(&mut self, spec: &QuerySpecification) -> Result<Vec<Row>> {
        let Some(entity) = self.entity(&spec.entity) else {
            tracing::warn!(entity = %spec.entity, "query for unknown entity");
            return Ok(Vec::new());
        };
        self.session.establish_connection()?;

        let mut rows = Vec::new();
        for target in self.targets(entity) {
            let predicate = Predicate::with_inheritance(target, spec.predicate.clone());
            let target_spec = spec.retarget(&target.name, predicate);
            let sql = Select::new(target, &target_spec).to_sql();
            for row in self.session.execute_query(&sql)? {
                let pk = target.primary_key_for_row(&row);
                if !pk.has_null() {
                    let id = self.session.obtain_entity_id(target, pk);
                    self.session.record_snapshot(id, row.to_map());
                }
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// SUM, COUNT, MIN, MAX and AVG of one field.
    ///
    /// No result row reads as NULL aggregates with a zero count.
    pub fn aggregate(
        &mut self,
        entity: &Entity,
        key: &str,
        predicate: Option<&Predicate>,
    ) -> Result<AggregateResult> {
        let predicate = Predicate::with_inheritance(entity, predicate.cloned());
        let sql = AggregateFunctions::new(entity, key, predicate.as_ref()).to_sql()?;
        self.session.establish_connection()?;
        match self.session.execute_query(&sql)?.first() {
            Some(row) => AggregateResult::from_row(row, &sql),
            None => Ok(AggregateResult::empty()),
        }
    }

    /// Destination objects of a to-many relationship.
    pub fn load_to_many(
        &mut self,
        entity: &Entity,
        object: &ObjectRef,
        relationship: &Relationship,
    ) -> Result<Vec<ObjectRef>> {
        let registry = self.registry;
        let Some(destination) = registry.destination_entity(entity, relationship) else {
            return Ok(Vec::new());
        };
        let value = get_value(object, &relationship.source_key).unwrap_or(Value::Null);
        if value.is_null() {
            return Ok(Vec::new());
        }
        let spec = QuerySpecification::filter(
            &destination.name,
            Predicate::eq(&relationship.destination_key, value),
        );
        self.execute(&spec)
    }

    /// Destination object of a to-one relationship, consulting the cache
    /// by key/value identity first.
    pub fn load_to_one(
        &mut self,
        entity: &Entity,
        object: &ObjectRef,
        relationship: &Relationship,
    ) -> Result<Option<ObjectRef>> {
        let registry = self.registry;
        let Some(destination) = registry.destination_entity(entity, relationship) else {
            return Ok(None);
        };
        let value = get_value(object, &relationship.source_key).unwrap_or(Value::Null);
        if value.is_null() {
            return Ok(None);
        }

        let id = relationship.cache_destination.then(|| {
            self.session
                .obtain_key_value_id(destination, &relationship.destination_key, value.clone())
        });
        if let Some(cached) = id.as_ref().and_then(|id| self.session.cached_object(id)) {
            tracing::trace!(relationship = %relationship.name, "to-one cache hit");
            return Ok(Some(cached));
        }

        let found = self.find_one(
            &destination.name,
            Predicate::eq(&relationship.destination_key, value),
        )?;
        if let (Some(id), Some(object)) = (&id, &found) {
            self.session.cache_object(id, object.clone());
        }
        Ok(found)
    }

    fn targets(&self, entity: &'a Entity) -> Vec<&'a Entity> {
        if entity.is_abstract() {
            self.registry.queried_entities(entity)
        } else {
            vec![entity]
        }
    }

    fn execute_for_entity(
        &mut self,
        entity: &'a Entity,
        spec: &QuerySpecification,
    ) -> Result<Vec<ObjectRef>> {
        let sql = Select::new(entity, spec).to_sql();
        let rows = self.session.execute_query(&sql)?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.materialize(entity, row, spec) {
                Ok(Some(object)) => objects.push(object),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(entity = %entity.name, error = %e, "row skipped");
                }
            }
        }
        tracing::debug!(entity = %entity.name, rows = rows.len(), objects = objects.len(), "fetched");
        Ok(objects)
    }

    fn materialize(
        &mut self,
        entity: &'a Entity,
        row: &Row,
        spec: &QuerySpecification,
    ) -> Result<Option<ObjectRef>> {
        let pk = entity.primary_key_for_row(row);
        if pk.has_null() {
            tracing::warn!(entity = %entity.name, "row without primary key skipped");
            return Ok(None);
        }
        let id = self.session.obtain_entity_id(entity, pk);
        self.session.record_snapshot(id.clone(), row.to_map());

        let object = match self.session.cached_object(&id) {
            Some(cached) if !spec.force_refetch => {
                tracing::trace!(entity_id = %id, "reusing cached object");
                return Ok(Some(cached));
            }
            Some(cached) => {
                entity.populate(&mut *write(&cached), row)?;
                cached
            }
            None => {
                let Some(object) = entity.create_instance() else {
                    tracing::warn!(entity = %entity.name, "cannot instantiate abstract entity");
                    return Ok(None);
                };
                entity.populate(&mut *write(&object), row)?;
                object
            }
        };
        tracing::trace!(entity_id = %id, "materialized");
        self.session.cache_object(&id, object.clone());

        self.wire_relationships(entity, &object, spec);
        write(&object).awake_from_fetch();
        self.delegate.awake_from_fetch(&object, entity);
        Ok(Some(object))
    }

    /// Faults for lazy to-many values, nothing for lazy to-one values, and
    /// loaded contents for prefetched ones. A failed prefetch leaves the
    /// relationship unloaded.
    fn wire_relationships(&mut self, entity: &'a Entity, object: &ObjectRef, spec: &QuerySpecification) {
        for relationship in entity.relationships() {
            let prefetch =
                relationship.prefetch || spec.prefetch.iter().any(|name| *name == relationship.name);

            if relationship.is_to_many() {
                let loaded = if prefetch {
                    self.load_to_many(entity, object, relationship)
                        .inspect_err(|e| {
                            tracing::error!(
                                relationship = %relationship.name,
                                error = %e,
                                "relationship load failed"
                            );
                        })
                        .ok()
                } else {
                    None
                };
                match write(object).relation_slot(&relationship.name) {
                    Some(RelationSlot::ToMany(slot)) => match loaded {
                        Some(objects) => slot.set_loaded(objects),
                        None => slot.turn_into_fault(),
                    },
                    _ => missing_property(entity, relationship),
                }
            } else {
                let target = if prefetch {
                    self.load_to_one(entity, object, relationship)
                        .inspect_err(|e| {
                            tracing::error!(
                                relationship = %relationship.name,
                                error = %e,
                                "relationship load failed"
                            );
                        })
                        .ok()
                        .flatten()
                } else {
                    None
                };
                match write(object).relation_slot(&relationship.name) {
                    Some(RelationSlot::ToOne(slot)) => *slot = target,
                    _ => missing_property(entity, relationship),
                }
            }
        }
    }
}

fn missing_property(entity: &Entity, relationship: &Relationship) {
    tracing::warn!(
        entity = %entity.name,
        relationship = %relationship.name,
        "instance has no matching relationship property"
    );
}
