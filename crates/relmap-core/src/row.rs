//! Result rows as drivers hand them to the query engine.
//!
//! Column names are the bare names the driver reports (`ID`, `NAME`), never
//! alias-qualified; entities resolve fields against them by column.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// The column layout of one result set.
#[derive(Debug, Clone, Default)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Layout for `names`. A repeated name resolves to its first position.
    pub fn new(names: Vec<String>) -> Self {
        let mut positions = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            positions.entry(name.clone()).or_insert(i);
        }
        Self { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One fetched row. Rows of a result set share their [`ColumnInfo`].
#[derive(Debug, Clone)]
pub struct Row {
    layout: Arc<ColumnInfo>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(names)), values)
    }

    /// A row over a layout shared with its siblings.
    pub fn with_columns(layout: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { layout, values }
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let (names, values) = pairs.into_iter().map(|(k, v)| (k.into(), v)).unzip();
        Self::new(names, values)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Positional access, used for aggregate and raw projections.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.layout.position(name).and_then(|i| self.values.get(i))
    }

    /// Convert the named column, reporting the column on failure.
    pub fn get_named<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let Some(value) = self.get_by_name(name) else {
            return Err(Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: "no such column".to_string(),
                column: Some(name.to_string()),
            }));
        };
        T::try_from(value.clone()).map_err(|error| match error {
            Error::Type(type_error) => Error::Type(TypeError {
                column: Some(name.to_string()),
                ..type_error
            }),
            other => other,
        })
    }

    /// `(column, value)` pairs in projection order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.layout
            .names()
            .iter()
            .map(String::as_str)
            .zip(&self.values)
    }

    /// The row as a snapshot-ready column map.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }
}
