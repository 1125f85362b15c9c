//! Declared field types.

use serde::{Deserialize, Serialize};

/// The value type a field is declared with.
///
/// Row values are coerced to this type when an object is populated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    // Integer types
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Real,
    Double,

    // Fixed precision, kept as text
    Decimal,

    Boolean,
    Text,
    Blob,

    // Date/time types
    Date,
    Timestamp,

    Json,

    // Collections coerce element-wise
    Array(Box<ValueType>),
}

impl ValueType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            ValueType::SmallInt => "SMALLINT".to_string(),
            ValueType::Integer => "INTEGER".to_string(),
            ValueType::BigInt => "BIGINT".to_string(),
            ValueType::Real => "REAL".to_string(),
            ValueType::Double => "DOUBLE PRECISION".to_string(),
            ValueType::Decimal => "DECIMAL".to_string(),
            ValueType::Boolean => "BOOLEAN".to_string(),
            ValueType::Text => "TEXT".to_string(),
            ValueType::Blob => "BLOB".to_string(),
            ValueType::Date => "DATE".to_string(),
            ValueType::Timestamp => "TIMESTAMP".to_string(),
            ValueType::Json => "JSON".to_string(),
            ValueType::Array(inner) => format!("{}[]", inner.sql_name()),
        }
    }

    /// Check if this type is numeric.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::SmallInt
                | ValueType::Integer
                | ValueType::BigInt
                | ValueType::Real
                | ValueType::Double
                | ValueType::Decimal
        )
    }

    /// Check if this type is a date/time type.
    pub const fn is_temporal(&self) -> bool {
        matches!(self, ValueType::Date | ValueType::Timestamp)
    }
}
