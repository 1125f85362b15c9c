//! The per-model unit of work.
//!
//! An [`Updater`] accumulates insert, update and delete operations and drains
//! them in one native transaction:
//!
//! ```text
//! Idle --record--> Accumulating --save--> Committing --ok--> Idle
//!                                             |
//!                                             +--error--> RolledBack (pending cleared)
//! ```
//!
//! The batch runs inserts, then updates, then deletes, each group in
//! recording order, after the delegate's filter and reorder hooks. A
//! failing operation rolls the whole batch back; the error names the
//! operation that failed.

use std::time::Instant;

use relmap_core::{CommitError, Error, ObjectRef, Registry, Result};

use crate::config::ConflictPolicy;
use crate::delegate::ContextDelegate;
use crate::entity_id::EntityId;
use crate::operation::{BatchEffects, Executor, Operation, OperationKind};
use crate::session::Session;

/// Counts reported by a successful save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Deletes the delegate refused.
    pub vetoed: usize,
    /// Optimistic statements that matched no row under
    /// [`ConflictPolicy::Report`].
    pub conflicts: usize,
}

impl CommitSummary {
    /// Rows written, cascades included.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    pub fn merge(&mut self, other: CommitSummary) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.vetoed += other.vetoed;
        self.conflicts += other.conflicts;
    }
}

/// Pending operations of one model plus the transaction flag.
#[derive(Debug, Default)]
pub struct Updater {
    auto_commit: bool,
    active: bool,
    inserts: Vec<Operation>,
    updates: Vec<Operation>,
    deletes: Vec<Operation>,
    next_sequence: u64,
}

impl Updater {
    pub fn new(auto_commit: bool) -> Self {
        Self {
            auto_commit,
            ..Self::default()
        }
    }

    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    pub fn has_changes(&self) -> bool {
        !(self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty())
    }

    pub fn pending_count(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    /// Record an operation, coalescing with an existing one for the same
    /// object and entity. A coalesced operation moves to the end of its
    /// group's recording order.
    pub fn record(&mut self, kind: OperationKind, object: &ObjectRef, entity: &str, now: Instant) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let list = match kind {
            OperationKind::Insert => &mut self.inserts,
            OperationKind::Update => &mut self.updates,
            OperationKind::Delete => &mut self.deletes,
        };
        match list.iter_mut().find(|op| op.targets(object, entity)) {
            Some(existing) => existing.touch(now, sequence),
            None => list.push(Operation::new(kind, object.clone(), entity, now, sequence)),
        }
        tracing::trace!(kind = %kind, entity = entity, sequence = sequence, "operation recorded");
    }

    /// Drop a pending insert of `object`.
    pub fn forget_insert(&mut self, object: &ObjectRef, entity: &str) -> bool {
        let before = self.inserts.len();
        self.inserts.retain(|op| !op.targets(object, entity));
        before != self.inserts.len()
    }

    /// Inserts, then updates, then deletes, each by recording time.
    pub fn ordered_operations(&self) -> Vec<Operation> {
        let mut ordered = Vec::with_capacity(self.pending_count());
        for group in [&self.inserts, &self.updates, &self.deletes] {
            let mut sorted = group.clone();
            sorted.sort_by_key(|op| (op.recorded_at(), op.sequence()));
            ordered.extend(sorted);
        }
        ordered
    }

    pub fn begin(&mut self, session: &mut Session) -> Result<()> {
        if !self.active {
            if !self.auto_commit {
                session.begin()?;
            }
            self.active = true;
        }
        Ok(())
    }

    pub fn commit(&mut self, session: &mut Session) -> Result<()> {
        if self.active {
            if !self.auto_commit {
                session.commit()?;
            }
            self.active = false;
        }
        self.clear();
        Ok(())
    }

    /// Roll back if a transaction is open, then drop all pending operations.
    pub fn rollback(&mut self, session: &mut Session) {
        if self.active {
            if !self.auto_commit {
                if let Err(e) = session.rollback() {
                    tracing::warn!(model = %session.model(), error = %e, "rollback failed");
                }
            }
            self.active = false;
        }
        self.clear();
    }

    pub fn clear(&mut self) {
        self.inserts.clear();
        self.updates.clear();
        self.deletes.clear();
    }

    /// Drain the pending operations in one transaction.
    ///
    /// A connection that cannot be established leaves the operations
    /// pending. Any later failure rolls back and clears them.
    #[tracing::instrument(level = "debug", skip_all, fields(model = %session.model()))]
    pub fn save(
        &mut self,
        session: &mut Session,
        registry: &Registry,
        delegate: &dyn ContextDelegate,
        conflict_policy: ConflictPolicy,
    ) -> Result<CommitSummary> {
        if !self.has_changes() {
            return Ok(CommitSummary::default());
        }
        session.establish_connection()?;
        self.begin(session)?;

        let operations =
            delegate.order_operations(delegate.filter_operations(self.ordered_operations()));
        tracing::debug!(count = operations.len(), "executing operations");

        let mut ex = Executor::new(registry, session, delegate, conflict_policy);
        let mut failure = None;
        for operation in &operations {
            if let Err(e) = operation.execute(&mut ex) {
                failure = Some(attach_operation(e, &operation.to_string()));
                break;
            }
        }
        let BatchEffects {
            summary,
            touched,
            deleted,
        } = ex.finish();

        if let Some(error) = failure {
            self.abandon(session, &touched, &deleted);
            return Err(error);
        }
        if let Err(e) = self.commit(session) {
            self.abandon(session, &touched, &deleted);
            return Err(attach_operation(e, &format!("Commit {{model={}}}", session.model())));
        }
        evict(session, &deleted);

        tracing::info!(
            model = %session.model(),
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            vetoed = summary.vetoed,
            conflicts = summary.conflicts,
            "changes saved"
        );
        Ok(summary)
    }

    /// Roll back and forget the snapshots this batch wrote; rows it
    /// inserted are uncached too. Deleted rows keep their snapshot and
    /// cached instance unless auto-commit already made the deletes stick.
    fn abandon(&mut self, session: &mut Session, touched: &[(EntityId, bool)], deleted: &[EntityId]) {
        if self.auto_commit {
            evict(session, deleted);
        }
        self.rollback(session);
        for (id, inserted) in touched {
            session.forget_snapshot(id);
            if *inserted {
                session.uncache(id);
            }
        }
        tracing::debug!(model = %session.model(), forgotten = touched.len(), "batch rolled back");
    }
}

fn evict(session: &mut Session, deleted: &[EntityId]) {
    for id in deleted {
        session.forget_snapshot(id);
        session.uncache(id);
    }
}

fn attach_operation(error: Error, operation: &str) -> Error {
    match error {
        Error::Validation(v) => Error::Validation(v.with_operation(operation)),
        other => Error::Commit(CommitError {
            operation: operation.to_string(),
            source: Box::new(other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::NoDelegate;
    use crate::session::tests::{Item, MockConnection, item_entity, session};
    use relmap_core::access::read_as;
    use relmap_core::{
        Entity, Field, LockingStrategy, Model, Relationship, Value, ValueType, object_ref,
    };
    use std::time::Duration;

    fn registry(entity: Entity) -> Registry {
        Registry::builder()
            .model(Model::new("main").entity(entity))
            .build()
            .unwrap()
    }

    fn item(id: i64, label: &str) -> ObjectRef {
        object_ref(Item {
            id,
            label: Some(label.to_string()),
        })
    }

    fn dml(conn: &MockConnection) -> Vec<String> {
        conn.state()
            .log
            .iter()
            .filter(|sql| !matches!(sql.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .cloned()
            .collect()
    }

    #[test]
    fn test_groups_run_in_kind_then_time_order() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        let registry = registry(item_entity());
        let t0 = Instant::now();
        let mut updater = Updater::new(false);

        let a = item(1, "a");
        let b = item(2, "b");
        let c = item(3, "c");
        updater.record(OperationKind::Delete, &a, "Item", t0);
        updater.record(OperationKind::Insert, &b, "Item", t0 + Duration::from_millis(1));
        updater.record(OperationKind::Update, &c, "Item", t0 + Duration::from_millis(2));

        let summary = updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap();
        assert_eq!(summary.total(), 3);
        assert_eq!(
            dml(&conn),
            [
                "INSERT INTO items (ID,LABEL) values (2,'b')",
                "UPDATE items SET LABEL='c' WHERE ID=3",
                "DELETE FROM items WHERE ID=1",
            ]
        );
        assert_eq!(conn.state().log.first().map(String::as_str), Some("BEGIN"));
        assert_eq!(conn.state().log.last().map(String::as_str), Some("COMMIT"));
        assert!(!updater.has_changes());
    }

    #[test]
    fn test_duplicate_records_coalesce() {
        let t0 = Instant::now();
        let mut updater = Updater::new(false);
        let a = item(1, "a");
        let b = item(2, "b");
        updater.record(OperationKind::Update, &a, "Item", t0);
        updater.record(OperationKind::Update, &b, "Item", t0 + Duration::from_millis(1));
        updater.record(OperationKind::Update, &a, "Item", t0 + Duration::from_millis(2));
        assert_eq!(updater.pending_count(), 2);

        let order: Vec<i64> = updater
            .ordered_operations()
            .iter()
            .filter_map(|op| read_as::<Item, _>(op.object(), |i| i.id))
            .collect();
        assert_eq!(order, [2, 1]);

        updater.record(OperationKind::Insert, &b, "Item", t0);
        assert!(updater.forget_insert(&b, "Item"));
        assert!(!updater.forget_insert(&b, "Item"));
    }

    #[test]
    fn test_statement_failure_rolls_back_and_names_operation() {
        let conn = MockConnection::default();
        conn.state().fail_on = Some("UPDATE".into());
        let mut session = session(&conn);
        let registry = registry(item_entity());
        let mut updater = Updater::new(false);
        let t0 = Instant::now();

        updater.record(OperationKind::Insert, &item(1, "a"), "Item", t0);
        updater.record(OperationKind::Update, &item(2, "b"), "Item", t0);
        let err = updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap_err();

        match &err {
            Error::Commit(commit) => {
                assert!(commit.operation.starts_with("Update {entity=Item"));
                assert!(matches!(*commit.source, Error::Query(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(conn.state().log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!updater.has_changes());
        // The insert's snapshot was rolled back with the batch.
        assert_eq!(session.snapshot_count(), 0);
    }

    #[test]
    fn test_validation_failure_is_not_wrapped() {
        #[derive(Default)]
        struct Strict;
        impl relmap_core::FieldAccess for Strict {
            fn field_keys(&self) -> &'static [&'static str] {
                &["id"]
            }
            fn get_value(&self, key: &str) -> Option<Value> {
                (key == "id").then_some(Value::BigInt(1))
            }
            fn set_value(&mut self, _key: &str, _value: Value) -> relmap_core::Assign {
                relmap_core::Assign::Applied
            }
        }
        impl relmap_core::RecordEvents for Strict {
            fn validate_for_save(&self) -> std::result::Result<(), relmap_core::ValidationError> {
                Err(relmap_core::ValidationError::new("never valid"))
            }
        }

        let conn = MockConnection::default();
        let mut session = session(&conn);
        let registry = registry(
            Entity::new::<Strict>("Strict", "strict")
                .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true)),
        );
        let mut updater = Updater::new(false);
        updater.record(OperationKind::Insert, &object_ref(Strict), "Strict", Instant::now());

        let err = updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap_err();
        match err {
            Error::Validation(v) => {
                assert_eq!(v.message, "never valid");
                assert!(v.operation.is_some_and(|op| op.starts_with("Insert")));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(dml(&conn).is_empty());
    }

    #[test]
    fn test_optimistic_conflict_policies() {
        let conn = MockConnection::default();
        conn.state().affected = Some(0);
        let mut session = session(&conn);
        let registry = registry(
            Entity::new::<Item>("Item", "items")
                .locking(LockingStrategy::Optimistic)
                .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
                .field(Field::new("label", "LABEL", ValueType::Text).lock(true)),
        );
        let mut updater = Updater::new(false);

        updater.record(OperationKind::Update, &item(1, "a"), "Item", Instant::now());
        let summary = updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap();
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.updated, 0);

        updater.record(OperationKind::Update, &item(1, "a"), "Item", Instant::now());
        let err = updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Raise)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.sql(), Some("UPDATE items SET LABEL='a' WHERE ID=1 AND LABEL='a'"));
    }

    #[test]
    fn test_pessimistic_update_widens_and_restores_isolation() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        let registry = registry(item_entity().locking(LockingStrategy::Pessimistic));
        let mut updater = Updater::new(false);
        updater.record(OperationKind::Update, &item(1, "a"), "Item", Instant::now());
        updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap();

        let state = conn.state();
        assert_eq!(
            state.isolation_history,
            [
                relmap_core::IsolationLevel::Serializable,
                relmap_core::IsolationLevel::ReadCommitted
            ]
        );
    }

    #[test]
    fn test_auto_commit_skips_transaction_statements() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        let registry = registry(item_entity());
        let mut updater = Updater::new(true);
        updater.record(OperationKind::Insert, &item(1, "a"), "Item", Instant::now());
        updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap();
        assert_eq!(conn.state().log, ["INSERT INTO items (ID,LABEL) values (1,'a')"]);
    }

    #[test]
    fn test_connection_failure_keeps_pending_operations() {
        let conn = MockConnection::default();
        conn.state().refuse_connect = true;
        let mut session = session(&conn);
        let registry = registry(item_entity());
        let mut updater = Updater::new(false);
        updater.record(OperationKind::Insert, &item(1, "a"), "Item", Instant::now());

        let err = updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap_err();
        assert!(err.is_connection_error());
        assert!(updater.has_changes());
    }

    #[derive(Default)]
    struct Parent {
        id: i64,
        children: relmap_core::Faulting,
    }

    impl relmap_core::FieldAccess for Parent {
        fn field_keys(&self) -> &'static [&'static str] {
            &["id"]
        }
        fn get_value(&self, key: &str) -> Option<Value> {
            (key == "id").then(|| Value::BigInt(self.id))
        }
        fn set_value(&mut self, key: &str, value: Value) -> relmap_core::Assign {
            if key != "id" {
                return relmap_core::Assign::UnknownKey;
            }
            match i64::try_from(value) {
                Ok(v) => {
                    self.id = v;
                    relmap_core::Assign::Applied
                }
                Err(e) => relmap_core::Assign::Rejected(e),
            }
        }
        fn relation(&self, name: &str) -> Option<relmap_core::RelationValue> {
            (name == "children").then(|| relmap_core::RelationValue::ToMany(self.children.clone()))
        }
    }

    impl relmap_core::RecordEvents for Parent {}

    #[derive(Default)]
    struct Child {
        id: i64,
        parent_id: Option<i64>,
    }

    impl relmap_core::FieldAccess for Child {
        fn field_keys(&self) -> &'static [&'static str] {
            &["id", "parent_id"]
        }
        fn get_value(&self, key: &str) -> Option<Value> {
            match key {
                "id" => Some(Value::BigInt(self.id)),
                "parent_id" => Some(Value::from(self.parent_id)),
                _ => None,
            }
        }
        fn set_value(&mut self, key: &str, value: Value) -> relmap_core::Assign {
            let result = match key {
                "id" => i64::try_from(value).map(|v| self.id = v),
                "parent_id" => Option::<i64>::try_from(value).map(|v| self.parent_id = v),
                _ => return relmap_core::Assign::UnknownKey,
            };
            match result {
                Ok(()) => relmap_core::Assign::Applied,
                Err(e) => relmap_core::Assign::Rejected(e),
            }
        }
    }

    impl relmap_core::RecordEvents for Child {}

    fn family(owned: bool) -> Registry {
        let model = Model::new("main")
            .entity(
                Entity::new::<Parent>("Parent", "parents")
                    .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
                    .relationship(
                        Relationship::to_many("children", "Child", "id", "parent_id")
                            .owns_destination(owned),
                    ),
            )
            .entity(
                Entity::new::<Child>("Child", "children")
                    .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
                    .field(Field::new("parent_id", "PARENT_ID", ValueType::BigInt)),
            );
        Registry::builder().model(model).build().unwrap()
    }

    fn parent_with_children() -> (ObjectRef, ObjectRef) {
        let child = object_ref(Child {
            id: 10,
            parent_id: Some(1),
        });
        let parent = object_ref(Parent {
            id: 1,
            children: relmap_core::Faulting::Loaded(vec![child.clone()]),
        });
        (parent, child)
    }

    #[test]
    fn test_owned_children_are_deleted() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        let registry = family(true);
        let (parent, _child) = parent_with_children();
        let mut updater = Updater::new(false);
        updater.record(OperationKind::Delete, &parent, "Parent", Instant::now());

        let summary = updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap();
        assert_eq!(summary.deleted, 2);
        assert_eq!(
            dml(&conn),
            ["DELETE FROM parents WHERE ID=1", "DELETE FROM children WHERE ID=10"]
        );
    }

    #[test]
    fn test_unowned_children_are_nullified() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        let registry = family(false);
        let (parent, child) = parent_with_children();
        let mut updater = Updater::new(false);
        updater.record(OperationKind::Delete, &parent, "Parent", Instant::now());

        let summary = updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap();
        assert_eq!((summary.deleted, summary.updated), (1, 1));
        assert_eq!(
            dml(&conn),
            [
                "DELETE FROM parents WHERE ID=1",
                "UPDATE children SET PARENT_ID=NULL WHERE ID=10"
            ]
        );
        assert_eq!(read_as::<Child, _>(&child, |c| c.parent_id), Some(None));
    }

    #[test]
    fn test_vetoed_delete_issues_nothing() {
        struct Keep;
        impl ContextDelegate for Keep {
            fn should_delete(&self, _object: &ObjectRef, _entity: &Entity) -> bool {
                false
            }
        }

        let conn = MockConnection::default();
        let mut session = session(&conn);
        let registry = family(true);
        let (parent, _child) = parent_with_children();
        let mut updater = Updater::new(false);
        updater.record(OperationKind::Delete, &parent, "Parent", Instant::now());

        let summary = updater
            .save(&mut session, &registry, &Keep, ConflictPolicy::Report)
            .unwrap();
        assert_eq!(summary.vetoed, 1);
        assert!(dml(&conn).is_empty());
    }

    #[test]
    fn test_reorder_hook_changes_execution_order() {
        struct Reverse;
        impl ContextDelegate for Reverse {
            fn order_operations(&self, mut operations: Vec<Operation>) -> Vec<Operation> {
                operations.reverse();
                operations
            }
        }

        let conn = MockConnection::default();
        let mut session = session(&conn);
        let registry = registry(item_entity());
        let mut updater = Updater::new(false);
        let t0 = Instant::now();
        updater.record(OperationKind::Insert, &item(1, "a"), "Item", t0);
        updater.record(OperationKind::Delete, &item(2, "b"), "Item", t0);
        updater
            .save(&mut session, &registry, &Reverse, ConflictPolicy::Report)
            .unwrap();
        assert_eq!(
            dml(&conn),
            ["DELETE FROM items WHERE ID=2", "INSERT INTO items (ID,LABEL) values (1,'a')"]
        );
    }

    #[test]
    fn test_generated_key_is_assigned() {
        let conn = MockConnection::default();
        let mut session = session(&conn);
        let registry = registry(
            Entity::new::<NullableItem>("Nullable", "nullable")
                .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
                .key_generator(relmap_core::IncrementKeyGenerator::starting_at(40)),
        );
        let object = object_ref(NullableItem::default());
        let mut updater = Updater::new(false);
        updater.record(OperationKind::Insert, &object, "Nullable", Instant::now());
        updater
            .save(&mut session, &registry, &NoDelegate, ConflictPolicy::Report)
            .unwrap();
        assert_eq!(read_as::<NullableItem, _>(&object, |i| i.id), Some(Some(40)));
        assert_eq!(dml(&conn), ["INSERT INTO nullable (ID) values (40)"]);
    }

    #[derive(Default)]
    struct NullableItem {
        id: Option<i64>,
    }

    impl relmap_core::FieldAccess for NullableItem {
        fn field_keys(&self) -> &'static [&'static str] {
            &["id"]
        }
        fn get_value(&self, key: &str) -> Option<Value> {
            (key == "id").then(|| Value::from(self.id))
        }
        fn set_value(&mut self, key: &str, value: Value) -> relmap_core::Assign {
            if key != "id" {
                return relmap_core::Assign::UnknownKey;
            }
            match Option::<i64>::try_from(value) {
                Ok(v) => {
                    self.id = v;
                    relmap_core::Assign::Applied
                }
                Err(e) => relmap_core::Assign::Rejected(e),
            }
        }
    }

    impl relmap_core::RecordEvents for NullableItem {}
}
