//! Sort orderings.

use std::cmp::Ordering;

use relmap_core::access::read;
use relmap_core::{Entity, FieldAccess, ObjectRef, Value};
use serde::{Deserialize, Serialize};

use crate::generation::SqlGenerationContext;

/// Sort direction.
///
/// The case-insensitive variants record intent only; comparison and SQL are
/// the same as for their case-sensitive counterparts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
    CaseInsensitiveAscending,
    CaseInsensitiveDescending,
}

impl Direction {
    pub const fn is_descending(&self) -> bool {
        matches!(
            self,
            Direction::Descending | Direction::CaseInsensitiveDescending
        )
    }

    pub const fn is_case_insensitive(&self) -> bool {
        matches!(
            self,
            Direction::CaseInsensitiveAscending | Direction::CaseInsensitiveDescending
        )
    }
}

/// One key of an ORDER BY.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortOrdering {
    pub key: String,
    pub direction: Direction,
}

impl SortOrdering {
    pub fn new(key: impl Into<String>, direction: Direction) -> Self {
        Self {
            key: key.into(),
            direction,
        }
    }

    pub fn asc(key: impl Into<String>) -> Self {
        Self::new(key, Direction::Ascending)
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self::new(key, Direction::Descending)
    }

    /// `Alias.COLUMN [DESC]`, or `None` for an unknown key.
    pub fn to_sql(&self, entity: &Entity, ctx: &mut SqlGenerationContext) -> Option<String> {
        let field = self.field(entity)?;
        Some(self.render(ctx.column_for_field(entity, field)))
    }

    /// `COLUMN [DESC]`.
    pub fn generate_string(&self, entity: &Entity) -> Option<String> {
        let field = self.field(entity)?;
        Some(self.render(field.column.clone()))
    }

    fn field<'e>(&self, entity: &'e Entity) -> Option<&'e relmap_core::Field> {
        let field = entity.field_named(&self.key);
        if field.is_none() {
            tracing::warn!(entity = %entity.name, key = %self.key, "sort key names an unknown field; dropped");
        }
        field
    }

    fn render(&self, column: String) -> String {
        if self.direction.is_descending() {
            column + " DESC"
        } else {
            column
        }
    }

    /// Compare two values in this ordering's direction.
    ///
    /// NULL sorts after everything ascending and before everything
    /// descending. Incomparable kinds tie.
    pub fn compare_values(&self, a: &Value, b: &Value) -> Ordering {
        let ascending = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
        };
        if self.direction.is_descending() {
            ascending.reverse()
        } else {
            ascending
        }
    }

    pub fn compare_objects(&self, a: &dyn FieldAccess, b: &dyn FieldAccess) -> Ordering {
        let a = a.get_value(&self.key).unwrap_or(Value::Null);
        let b = b.get_value(&self.key).unwrap_or(Value::Null);
        self.compare_values(&a, &b)
    }
}

/// Lexicographic cascade: the first ordering that does not tie decides.
pub fn compare_with(orderings: &[SortOrdering], a: &dyn FieldAccess, b: &dyn FieldAccess) -> Ordering {
    orderings
        .iter()
        .map(|ordering| ordering.compare_objects(a, b))
        .find(|ord| ord.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Stable in-place sort of live objects.
pub fn sort_objects(objects: &mut [ObjectRef], orderings: &[SortOrdering]) {
    if orderings.is_empty() {
        return;
    }
    objects.sort_by(|a, b| {
        if std::sync::Arc::ptr_eq(a, b) {
            return Ordering::Equal;
        }
        let a = read(a);
        let b = read(b);
        compare_with(orderings, &*a, &*b)
    });
}

/// A sorted copy.
pub fn sorted_objects(objects: &[ObjectRef], orderings: &[SortOrdering]) -> Vec<ObjectRef> {
    let mut sorted = objects.to_vec();
    sort_objects(&mut sorted, orderings);
    sorted
}
