//! Per-model database session.
//!
//! A [`Session`] owns everything one data source needs inside a context:
//! the connection, the canonical [`EntityId`] set, the snapshot table and
//! the object cache. Nothing here is shared with other sessions except the
//! cache handle, which a maintenance owner may hold to sweep expired
//! entries.
//!
//! # Design
//!
//! Identity de-duplication keeps every id ever handed out in a `HashSet`
//! and returns the stored instance on a structural hit, so callers comparing
//! ids by pointer see the same allocation for the same row.
//!
//! Locking statements raise the connection's isolation level through an
//! [`IsolationGuard`], which restores the default level when dropped, on the
//! failure path as well.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use relmap_core::{
    Connection, ConnectionErrorKind, Entity, Error, IsolationLevel, ObjectRef, Result, Row,
    RowId, Value,
};
use relmap_query::Predicate;

use crate::cache::{Clock, EntityCache};
use crate::entity_id::EntityId;
use crate::snapshot::Snapshot;

/// Connection, identities, snapshots and object cache for one model.
pub struct Session {
    model: String,
    connection: Box<dyn Connection>,
    ids: HashSet<EntityId>,
    snapshots: HashMap<EntityId, Snapshot>,
    cache: Arc<EntityCache>,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new(
        model: impl Into<String>,
        connection: Box<dyn Connection>,
        cache: Arc<EntityCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            model: model.into(),
            connection,
            ids: HashSet::new(),
            snapshots: HashMap::new(),
            cache,
            clock,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn connection(&self) -> &dyn Connection {
        &*self.connection
    }

    pub fn connection_mut(&mut self) -> &mut dyn Connection {
        &mut *self.connection
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Connect unless already live.
    pub fn establish_connection(&mut self) -> Result<()> {
        if self.connection.is_connected() {
            return Ok(());
        }
        if self.connection.connect()? {
            tracing::debug!(model = %self.model, "connection established");
            Ok(())
        } else {
            Err(Error::connection(
                ConnectionErrorKind::Connect,
                format!("could not connect data source of model '{}'", self.model),
            ))
        }
    }

    /// Close the connection and drop identities, snapshots and cached
    /// objects.
    pub fn disconnect(&mut self) {
        if self.connection.is_connected() {
            if let Err(e) = self.connection.disconnect() {
                tracing::warn!(model = %self.model, error = %e, "disconnect failed");
            }
        }
        self.ids.clear();
        self.snapshots.clear();
        self.cache.clear();
        tracing::debug!(model = %self.model, "session disconnected");
    }

    pub fn begin(&mut self) -> Result<()> {
        self.connection.begin()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.connection.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.connection.rollback()
    }

    pub fn execute_update(&mut self, sql: &str) -> Result<u64> {
        tracing::debug!(model = %self.model, sql = %sql, "executing update");
        self.connection.execute(sql)
    }

    pub fn execute_query(&mut self, sql: &str) -> Result<Vec<Row>> {
        tracing::debug!(model = %self.model, sql = %sql, "executing query");
        self.connection.query(sql)
    }

    /// Raise the isolation level for a locking statement.
    ///
    /// The level drops back to the connection default when the guard goes
    /// out of scope.
    pub fn widen_isolation(&mut self) -> Result<IsolationGuard<'_>> {
        let restore = self.connection.default_isolation_level();
        match self.connection.locking_isolation_level() {
            Some(level) => {
                self.connection.set_isolation_level(level)?;
                tracing::debug!(model = %self.model, level = level.as_sql(), "isolation widened");
            }
            None => {
                tracing::warn!(model = %self.model, "driver supports no locking isolation level");
            }
        }
        Ok(IsolationGuard {
            connection: &mut *self.connection,
            restore,
        })
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// The canonical id for a primary-key tuple of `entity`. Components are
    /// coerced to their declared types first.
    pub fn obtain_entity_id(&mut self, entity: &Entity, pk: RowId) -> EntityId {
        let pk = entity.coerce_primary_key(&pk);
        self.canonical(EntityId::primary_key(&entity.name, entity.cache_strategy, pk))
    }

    /// The canonical id for a single `(key, value)` lookup on `entity`.
    pub fn obtain_key_value_id(&mut self, entity: &Entity, key: &str, value: Value) -> EntityId {
        let value = entity.coerce_key_value(key, &value);
        self.canonical(EntityId::key_value(
            &entity.name,
            entity.cache_strategy,
            key,
            value,
        ))
    }

    fn canonical(&mut self, candidate: EntityId) -> EntityId {
        if let Some(existing) = self.ids.get(&candidate) {
            return existing.clone();
        }
        self.ids.insert(candidate.clone());
        candidate
    }

    /// Number of canonical ids handed out.
    pub fn identity_count(&self) -> usize {
        self.ids.len()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn record_snapshot(&mut self, id: EntityId, row: BTreeMap<String, Value>) {
        tracing::debug!(entity_id = %id, "snapshot recorded");
        let snapshot = Snapshot::new(id.clone(), row, self.clock.now());
        self.snapshots.insert(id, snapshot);
    }

    /// Overwrite the row of an existing snapshot, recording one if absent.
    pub fn update_snapshot(&mut self, id: EntityId, row: BTreeMap<String, Value>) {
        let now = self.clock.now();
        match self.snapshots.get_mut(&id) {
            Some(snapshot) => {
                snapshot.row = row;
                snapshot.timestamp = now;
                tracing::debug!(entity_id = %id, "snapshot updated");
            }
            None => self.record_snapshot(id, row),
        }
    }

    pub fn forget_snapshot(&mut self, id: &EntityId) -> Option<Snapshot> {
        let removed = self.snapshots.remove(id);
        if removed.is_some() {
            tracing::debug!(entity_id = %id, "snapshot forgotten");
        }
        removed
    }

    pub fn snapshot(&self, id: &EntityId) -> Option<&Snapshot> {
        self.snapshots.get(id)
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Some snapshot of `entity` whose row satisfies `predicate`.
    pub fn snapshot_for_predicate(&self, entity: &Entity, predicate: &Predicate) -> Option<&Snapshot> {
        self.snapshots.values().find(|snapshot| {
            snapshot.entity_id.entity() == entity.name && predicate.matches_row(entity, &snapshot.row)
        })
    }

    /// Some snapshot of `entity` with the given property values.
    pub fn snapshot_for_values<K, I>(&self, entity: &Entity, values: I) -> Option<&Snapshot>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let predicate = Predicate::from_field_values(values)?;
        self.snapshot_for_predicate(entity, &predicate)
    }

    // ========================================================================
    // Object cache
    // ========================================================================

    pub fn cached_object(&self, id: &EntityId) -> Option<ObjectRef> {
        self.cache.get(id)
    }

    pub fn cache_object(&self, id: &EntityId, object: ObjectRef) {
        self.cache.add(id, object);
    }

    pub fn uncache(&self, id: &EntityId) -> Option<ObjectRef> {
        self.cache.remove(id)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("model", &self.model)
            .field("connected", &self.connection.is_connected())
            .field("ids", &self.ids.len())
            .field("snapshots", &self.snapshots.len())
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Connection borrowed at a raised isolation level.
///
/// Dropping the guard restores the level captured when it was created. A
/// failed restore is logged, since the guard cannot report it.
pub struct IsolationGuard<'a> {
    connection: &'a mut dyn Connection,
    restore: IsolationLevel,
}

impl IsolationGuard<'_> {
    pub fn restore_level(&self) -> IsolationLevel {
        self.restore
    }
}

impl<'a> Deref for IsolationGuard<'a> {
    type Target = dyn Connection + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.connection
    }
}

impl DerefMut for IsolationGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.connection
    }
}

impl Drop for IsolationGuard<'_> {
    fn drop(&mut self) {
        match self.connection.set_isolation_level(self.restore) {
            Ok(()) => tracing::debug!(level = self.restore.as_sql(), "isolation restored"),
            Err(e) => tracing::warn!(
                level = self.restore.as_sql(),
                error = %e,
                "could not restore isolation level"
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::{CacheConfig, ManualClock};
    use relmap_core::{Assign, CacheStrategy, Field, FieldAccess, RecordEvents, ValueType};
    use std::sync::Mutex;

    /// Statement log and canned results shared between a test and its
    /// [`MockConnection`].
    #[derive(Debug, Default)]
    pub(crate) struct MockState {
        pub connected: bool,
        pub refuse_connect: bool,
        pub log: Vec<String>,
        pub isolation: IsolationLevel,
        pub isolation_history: Vec<IsolationLevel>,
        pub results: Vec<Vec<Row>>,
        pub affected: Option<u64>,
        pub fail_on: Option<String>,
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct MockConnection {
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockConnection {
        pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
            self.state.lock().unwrap()
        }

        fn run(&self, sql: &str) -> Result<()> {
            let mut state = self.state();
            state.log.push(sql.to_string());
            match &state.fail_on {
                Some(fragment) if sql.contains(fragment.as_str()) => Err(Error::query(
                    relmap_core::QueryErrorKind::Database,
                    sql,
                    "injected failure",
                )),
                _ => Ok(()),
            }
        }
    }

    impl Connection for MockConnection {
        fn connect(&mut self) -> Result<bool> {
            let mut state = self.state();
            state.connected = !state.refuse_connect;
            Ok(state.connected)
        }
        fn is_connected(&self) -> bool {
            self.state().connected
        }
        fn disconnect(&mut self) -> Result<()> {
            self.state().connected = false;
            Ok(())
        }
        fn begin(&mut self) -> Result<()> {
            self.run("BEGIN")
        }
        fn commit(&mut self) -> Result<()> {
            self.run("COMMIT")
        }
        fn rollback(&mut self) -> Result<()> {
            self.run("ROLLBACK")
        }
        fn execute(&mut self, sql: &str) -> Result<u64> {
            self.run(sql)?;
            Ok(self.state().affected.unwrap_or(1))
        }
        fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
            self.run(sql)?;
            let mut state = self.state();
            if state.results.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(state.results.remove(0))
            }
        }
        fn isolation_level(&self) -> IsolationLevel {
            self.state().isolation
        }
        fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
            let mut state = self.state();
            state.isolation = level;
            state.isolation_history.push(level);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub(crate) struct Item {
        pub id: i64,
        pub label: Option<String>,
    }

    impl FieldAccess for Item {
        fn field_keys(&self) -> &'static [&'static str] {
            &["id", "label"]
        }
        fn get_value(&self, key: &str) -> Option<Value> {
            match key {
                "id" => Some(Value::from(self.id)),
                "label" => Some(Value::from(self.label.clone())),
                _ => None,
            }
        }
        fn set_value(&mut self, key: &str, value: Value) -> Assign {
            let result = match key {
                "id" => i64::try_from(value).map(|v| self.id = v),
                "label" => Option::<String>::try_from(value).map(|v| self.label = v),
                _ => return Assign::UnknownKey,
            };
            match result {
                Ok(()) => Assign::Applied,
                Err(e) => Assign::Rejected(e),
            }
        }
    }

    impl RecordEvents for Item {}

    pub(crate) fn item_entity() -> Entity {
        Entity::new::<Item>("Item", "items")
            .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
            .field(Field::new("label", "LABEL", ValueType::Text))
    }

    pub(crate) fn session(conn: &MockConnection) -> Session {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let cache = Arc::new(EntityCache::with_clock(CacheConfig::default(), clock.clone()));
        Session::new("main", Box::new(conn.clone()), cache, clock)
    }

    #[test]
    fn test_entity_ids_are_deduplicated() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        let entity = item_entity();
        let a = session.obtain_entity_id(&entity, RowId::single("id", 1i64));
        let b = session.obtain_entity_id(&entity, RowId::single("id", 1i64));
        let c = session.obtain_entity_id(&entity, RowId::single("id", 2i64));
        assert!(a.ptr_eq(&b));
        assert_ne!(a, c);

        let kv1 = session.obtain_key_value_id(&entity, "label", Value::Text("x".into()));
        let kv2 = session.obtain_key_value_id(&entity, "label", Value::Text("x".into()));
        assert!(kv1.ptr_eq(&kv2));
        assert_eq!(session.identity_count(), 3);
    }

    #[test]
    fn test_snapshot_lifecycle_and_lookup() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        let entity = item_entity();
        let id = session.obtain_entity_id(&entity, RowId::single("id", 1i64));
        let row = Row::from_pairs([("ID", Value::BigInt(1)), ("LABEL", Value::Text("a".into()))]);

        session.record_snapshot(id.clone(), row.to_map());
        let found = session.snapshot_for_values(&entity, [("label", Value::Text("a".into()))]);
        assert!(found.is_some_and(|s| s.entity_id.ptr_eq(&id)));
        assert!(session
            .snapshot_for_predicate(&entity, &Predicate::eq("label", "b"))
            .is_none());

        let mut changed = row.to_map();
        changed.insert("LABEL".into(), Value::Text("b".into()));
        session.update_snapshot(id.clone(), changed);
        assert_eq!(
            session.snapshot(&id).and_then(|s| s.get("LABEL")),
            Some(&Value::Text("b".into()))
        );

        assert!(session.forget_snapshot(&id).is_some());
        assert_eq!(session.snapshot_count(), 0);
    }

    #[test]
    fn test_connection_refusal_is_connection_error() {
        let conn = MockConnection::default();
        conn.state().refuse_connect = true;
        let mut session = session(&conn);
        assert!(session.establish_connection().unwrap_err().is_connection_error());

        conn.state().refuse_connect = false;
        assert!(session.establish_connection().is_ok());
        assert!(session.connection().is_connected());
    }

    #[test]
    fn test_isolation_guard_restores_on_drop() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        {
            let mut guard = session.widen_isolation().unwrap();
            assert_eq!(guard.isolation_level(), IsolationLevel::Serializable);
            assert!(guard.execute("UPDATE items SET LABEL='x' WHERE ID=1").is_ok());
        }
        assert_eq!(conn.state().isolation, IsolationLevel::ReadCommitted);
        assert_eq!(
            conn.state().isolation_history,
            [IsolationLevel::Serializable, IsolationLevel::ReadCommitted]
        );
    }

    #[test]
    fn test_disconnect_clears_everything() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        session.establish_connection().unwrap();
        let entity = item_entity().cache_strategy(CacheStrategy::DistantFuture);
        let id = session.obtain_entity_id(&entity, RowId::single("id", 1i64));
        session.record_snapshot(id.clone(), BTreeMap::new());
        session.cache_object(&id, relmap_core::object_ref(Item::default()));

        session.disconnect();
        assert!(!conn.state().connected);
        assert_eq!(session.snapshot_count(), 0);
        assert_eq!(session.identity_count(), 0);
        assert!(session.cached_object(&id).is_none());
    }
}
