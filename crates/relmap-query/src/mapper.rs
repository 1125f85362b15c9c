//! Mapping raw result rows onto caller types.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use relmap_core::{Assign, Entity, Field, Record, Result, Row, Value, ValueType};

/// Turns one result row into a caller value. Used by raw-SQL execution,
/// which bypasses the identity layer entirely.
pub trait RowMapper {
    type Output;

    fn map_row(&self, row: &Row) -> Result<Self::Output>;
}

impl<F, T> RowMapper for F
where
    F: Fn(&Row) -> Result<T>,
{
    type Output = T;

    fn map_row(&self, row: &Row) -> Result<T> {
        self(row)
    }
}

type Converter = Box<dyn Fn(&Value) -> Value + Send + Sync>;

struct Mapping {
    column: String,
    key: String,
    value_type: Option<ValueType>,
}

/// Maps named columns onto properties of a fresh `T`.
///
/// Values pass through a per-key converter when one is registered, else are
/// coerced to the declared type (with a per-key date format), else are
/// assigned raw. Unassignable values are logged and skipped.
///
/// ```ignore
/// let mapper = ColumnMapper::<Report>::new()
///     .column("TOTAL", "total")
///     .typed_column("DAY", "day", ValueType::Date)
///     .date_format("day", "%d.%m.%Y");
/// let reports = ctx.execute_sql("Sales", "SELECT ...", &mapper)?;
/// ```
pub struct ColumnMapper<T> {
    mappings: Vec<Mapping>,
    converters: HashMap<String, Converter>,
    date_formats: HashMap<String, String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record + Default> ColumnMapper<T> {
    pub fn new() -> Self {
        Self {
            mappings: Vec::new(),
            converters: HashMap::new(),
            date_formats: HashMap::new(),
            _marker: PhantomData,
        }
    }

    /// One mapping per field of `entity`, typed by the field declarations.
    pub fn for_entity(entity: &Entity) -> Self {
        let mut mapper = Self::new();
        for field in entity.fields() {
            mapper = mapper.typed_column(&field.column, &field.key, field.value_type.clone());
            if let Some(format) = &field.date_format {
                mapper = mapper.date_format(&field.key, format);
            }
        }
        mapper
    }

    /// Assign the column's value as-is.
    pub fn column(mut self, column: impl Into<String>, key: impl Into<String>) -> Self {
        self.mappings.push(Mapping {
            column: column.into(),
            key: key.into(),
            value_type: None,
        });
        self
    }

    /// Coerce the column's value to `value_type` before assigning.
    pub fn typed_column(
        mut self,
        column: impl Into<String>,
        key: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        self.mappings.push(Mapping {
            column: column.into(),
            key: key.into(),
            value_type: Some(value_type),
        });
        self
    }

    pub fn converter(
        mut self,
        key: impl Into<String>,
        converter: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.converters.insert(key.into(), Box::new(converter));
        self
    }

    pub fn date_format(mut self, key: impl Into<String>, format: impl Into<String>) -> Self {
        self.date_formats.insert(key.into(), format.into());
        self
    }

    fn convert(&self, mapping: &Mapping, raw: &Value) -> Value {
        if let Some(converter) = self.converters.get(&mapping.key) {
            return converter(raw);
        }
        match &mapping.value_type {
            Some(value_type) => {
                let mut field = Field::new(&mapping.key, &mapping.column, value_type.clone());
                if let Some(format) = self.date_formats.get(&mapping.key) {
                    field = field.date_format(format);
                }
                field.coerce_value(raw)
            }
            None => raw.clone(),
        }
    }
}

impl<T: Record + Default> Default for ColumnMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record + Default> RowMapper for ColumnMapper<T> {
    type Output = T;

    fn map_row(&self, row: &Row) -> Result<T> {
        let mut object = T::default();
        for mapping in &self.mappings {
            let raw = row.get_by_name(&mapping.column).unwrap_or(&Value::Null);
            match object.set_value(&mapping.key, self.convert(mapping, raw)) {
                Assign::Applied => {}
                Assign::UnknownKey => {
                    tracing::warn!(key = %mapping.key, column = %mapping.column, "mapped type has no such property");
                }
                Assign::Rejected(e) => {
                    tracing::warn!(key = %mapping.key, error = %e, "value rejected; property left unset");
                }
            }
        }
        Ok(object)
    }
}

impl<T> fmt::Debug for ColumnMapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<(&str, &str)> = self
            .mappings
            .iter()
            .map(|m| (m.column.as_str(), m.key.as_str()))
            .collect();
        f.debug_struct("ColumnMapper")
            .field("mappings", &pairs)
            .field("converters", &self.converters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
