//! Primary-key generators.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::Result;
use crate::connection::Connection;
use crate::entity::Entity;
use crate::value::Value;

/// Supplies a primary key for an object inserted without one.
///
/// Returning `Ok(None)` means no key could be produced; the insert is then
/// skipped with an error log.
pub trait PrimaryKeyGenerator: Send + Sync {
    fn next_primary_key(&self, entity: &Entity, conn: &mut dyn Connection)
    -> Result<Option<Value>>;
}

/// Reads the next value of a database sequence with `select nextval('seq')`.
#[derive(Debug, Clone)]
pub struct SequenceKeyGenerator {
    sequence: String,
}

impl SequenceKeyGenerator {
    pub fn new(sequence: impl Into<String>) -> Self {
        Self {
            sequence: sequence.into(),
        }
    }

    pub fn sql(&self) -> String {
        format!("select nextval('{}')", self.sequence)
    }
}

impl PrimaryKeyGenerator for SequenceKeyGenerator {
    fn next_primary_key(
        &self,
        entity: &Entity,
        conn: &mut dyn Connection,
    ) -> Result<Option<Value>> {
        if entity.primary_key_field().is_none() {
            return Ok(None);
        }
        let sql = self.sql();
        tracing::debug!(entity = %entity.name, sql = %sql, "fetching sequence value");
        let rows = conn.query(&sql)?;
        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .filter(|value| !value.is_null())
            .cloned())
    }
}

/// Process-local counter, for drivers without sequences.
#[derive(Debug)]
pub struct IncrementKeyGenerator {
    next: AtomicI64,
}

impl IncrementKeyGenerator {
    /// Start handing out keys at `first`.
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for IncrementKeyGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl PrimaryKeyGenerator for IncrementKeyGenerator {
    fn next_primary_key(
        &self,
        _entity: &Entity,
        _conn: &mut dyn Connection,
    ) -> Result<Option<Value>> {
        Ok(Some(Value::BigInt(self.next.fetch_add(1, Ordering::Relaxed))))
    }
}
