//! Context-wide lifecycle callbacks.

use std::fmt;

use relmap_core::{Entity, ObjectRef};

use crate::operation::Operation;

/// Callbacks a context invokes around fetches and commits.
///
/// Every method has a no-op default, so an implementation overrides only
/// what it needs. Callbacks receive the object handle unlocked and may lock
/// it themselves.
///
/// ```ignore
/// struct Audit;
///
/// impl ContextDelegate for Audit {
///     fn did_delete(&self, object: &ObjectRef, entity: &Entity) {
///         tracing::info!(entity = %entity.name, "row removed");
///     }
///
///     fn should_delete(&self, _object: &ObjectRef, entity: &Entity) -> bool {
///         entity.name != "Ledger"
///     }
/// }
/// ```
pub trait ContextDelegate: Send + Sync {
    fn awake_from_insert(&self, object: &ObjectRef, entity: &Entity) {
        let _ = (object, entity);
    }

    fn awake_from_fetch(&self, object: &ObjectRef, entity: &Entity) {
        let _ = (object, entity);
    }

    fn will_update(&self, object: &ObjectRef, entity: &Entity) {
        let _ = (object, entity);
    }

    fn did_update(&self, object: &ObjectRef, entity: &Entity) {
        let _ = (object, entity);
    }

    fn will_delete(&self, object: &ObjectRef, entity: &Entity) {
        let _ = (object, entity);
    }

    fn did_delete(&self, object: &ObjectRef, entity: &Entity) {
        let _ = (object, entity);
    }

    /// Returning `false` vetoes a recorded delete: no SQL, no cascade.
    fn should_delete(&self, object: &ObjectRef, entity: &Entity) -> bool {
        let _ = (object, entity);
        true
    }

    /// Drop operations from the batch before it runs.
    fn filter_operations(&self, operations: Vec<Operation>) -> Vec<Operation> {
        operations
    }

    /// Reorder the (filtered) batch before it runs.
    fn order_operations(&self, operations: Vec<Operation>) -> Vec<Operation> {
        operations
    }
}

/// The delegate used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelegate;

impl ContextDelegate for NoDelegate {}

impl fmt::Debug for dyn ContextDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextDelegate")
    }
}
