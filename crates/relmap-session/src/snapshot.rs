//! Raw-row captures tied to an identity.

use std::collections::BTreeMap;
use std::time::Instant;

use relmap_core::Value;

use crate::entity_id::EntityId;

/// The last row seen for an identity, keyed by column name.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub entity_id: EntityId,
    pub row: BTreeMap<String, Value>,
    pub timestamp: Instant,
}

impl Snapshot {
    pub fn new(entity_id: EntityId, row: BTreeMap<String, Value>, timestamp: Instant) -> Self {
        Self {
            entity_id,
            row,
            timestamp,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.row.get(column)
    }
}
