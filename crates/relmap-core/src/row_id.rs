//! Primary-key tuples.

use std::collections::BTreeMap;
use std::fmt;

use crate::value::Value;

/// An ordered mapping from primary-key property keys to values.
///
/// Equality is structural map equality, so a `RowId` computed from an object
/// and one recovered from a fetched row compare equal when the keys match.
#[derive(Debug, Clone, Default, PartialEq, Hash)]
pub struct RowId {
    ids: BTreeMap<String, Value>,
}

impl Eq for RowId {}

impl RowId {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-column key.
    pub fn single(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut id = Self::new();
        id.insert(key, value);
        id
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.ids.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.ids.get(key)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Is any component missing a value?
    pub fn has_null(&self) -> bool {
        self.ids.is_empty() || self.ids.values().any(Value::is_null)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.ids.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for RowId {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.ids.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}
