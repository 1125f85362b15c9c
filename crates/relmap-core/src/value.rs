//! Dynamic SQL values.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, TypeError};

/// Format used when a date or timestamp is rendered as a SQL literal.
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// A dynamically-typed SQL value.
///
/// Raw rows, snapshot captures, predicate literals and the field accessor
/// all exchange data through this enum. Dates and timestamps count from the
/// Unix epoch so both kinds share one axis for comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    /// Exact numeric kept in its textual form.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    /// Days since the epoch.
    Date(i32),
    /// Microseconds since the epoch.
    Timestamp(i64),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL name of the value's kind, used in conversion errors.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "REAL",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Json(_) => "JSON",
            Value::Array(_) => "ARRAY",
        }
    }

    /// Integral, floating or decimal.
    pub const fn is_numeric(&self) -> bool {
        self.is_integral()
            || matches!(self, Value::Float(_) | Value::Double(_) | Value::Decimal(_))
    }

    pub const fn is_integral(&self) -> bool {
        matches!(self, Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_))
    }

    /// Booleans, or integers read as "non-zero".
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => self.as_i64().map(|n| n != 0),
        }
    }

    /// Integral kinds widened to `i64`; `true` reads as 1.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Value::SmallInt(n) => i64::from(n),
            Value::Int(n) => i64::from(n),
            Value::BigInt(n) => n,
            Value::Bool(flag) => i64::from(flag),
            _ => return None,
        })
    }

    /// Any numeric kind as `f64`. Decimals are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(f64::from(*x)),
            Value::Double(x) => Some(*x),
            Value::Decimal(text) => text.parse().ok(),
            Value::Bool(_) => None,
            other => other.as_i64().map(|n| n as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) | Value::Decimal(text) => Some(text),
            _ => None,
        }
    }

    fn epoch_micros(&self) -> Option<i64> {
        match *self {
            Value::Timestamp(micros) => Some(micros),
            Value::Date(days) => i64::from(days).checked_mul(MICROS_PER_DAY),
            _ => None,
        }
    }

    /// Build a `Date` value from a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Value::Date(date.signed_duration_since(NaiveDate::default()).num_days() as i32)
    }

    /// Build a `Timestamp` value. Instants past the microsecond range become NULL.
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        let since_epoch = at.signed_duration_since(NaiveDateTime::default());
        if let Some(micros) = since_epoch.num_microseconds() {
            Value::Timestamp(micros)
        } else {
            tracing::warn!(datetime = %at, "timestamp out of range; storing NULL");
            Value::Null
        }
    }

    /// The calendar date-time of a `Date` or `Timestamp`.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::default().checked_add_signed(Duration::microseconds(self.epoch_micros()?))
    }

    /// Render this value as a SQL literal for command text.
    ///
    /// Strings are single-quoted without escaping, dates use
    /// [`SQL_DATETIME_FORMAT`], booleans are bare `true`/`false`.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Text(text) => format!("'{text}'"),
            Value::Json(json) => format!("'{json}'"),
            Value::Date(_) | Value::Timestamp(_) => self.to_datetime().map_or_else(
                || "NULL".to_string(),
                |at| format!("'{}'", at.format(SQL_DATETIME_FORMAT)),
            ),
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
                format!("X'{hex}'")
            }
            other => other.to_string(),
        }
    }

    /// Ordering between two non-null values of compatible kinds.
    ///
    /// Integers compare exactly, mixed numerics compare as `f64`, dates and
    /// timestamps compare on the shared microsecond axis. Returns `None` when
    /// either side is NULL or the kinds are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Date(_) | Value::Timestamp(_), Value::Date(_) | Value::Timestamp(_)) => {
                Some(self.epoch_micros()?.cmp(&other.epoch_micros()?))
            }
            (a, b) if a.is_integral() && b.is_integral() => Some(a.as_i64()?.cmp(&b.as_i64()?)),
            (a, b) if a.is_numeric() && b.is_numeric() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            _ => None,
        }
    }

    /// Equality used by predicates: numeric kinds compare by value, other
    /// kinds structurally.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match self.compare(other) {
            Some(ord) => ord == Ordering::Equal,
            None => !self.is_null() && self == other,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // -0.0 == 0.0, so both must hash alike
        fn float_bits(x: f64) -> u64 {
            if x == 0.0 { 0 } else { x.to_bits() }
        }

        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(flag) => flag.hash(state),
            Value::SmallInt(n) => n.hash(state),
            Value::Int(n) | Value::Date(n) => n.hash(state),
            Value::BigInt(n) | Value::Timestamp(n) => n.hash(state),
            Value::Float(x) => float_bits(f64::from(*x)).hash(state),
            Value::Double(x) => float_bits(*x).hash(state),
            Value::Decimal(text) | Value::Text(text) => text.hash(state),
            Value::Bytes(bytes) => bytes.hash(state),
            Value::Json(json) => json.to_string().hash(state),
            Value::Array(items) => items.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::SmallInt(n) => write!(f, "{n}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::BigInt(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Double(x) => write!(f, "{x}"),
            Value::Decimal(text) | Value::Text(text) => f.write_str(text),
            Value::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Json(json) => write!(f, "{json}"),
            Value::Date(_) | Value::Timestamp(_) => match self.to_datetime() {
                None => f.write_str("NULL"),
                Some(at) if matches!(self, Value::Date(_)) => write!(f, "{}", at.date()),
                Some(at) => write!(f, "{}", at.format(SQL_DATETIME_FORMAT)),
            },
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

// ==================== Into Value ====================

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(v: $source) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    u32 => BigInt,
    f32 => Float,
    f64 => Double,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    &[u8] => Bytes,
    serde_json::Value => Json,
}

impl From<NaiveDate> for Value {
    fn from(date: NaiveDate) -> Self {
        Value::from_date(date)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(at: NaiveDateTime) -> Self {
        Value::from_datetime(at)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

// ==================== Out of Value ====================

fn mismatch(expected: &'static str, actual: &Value) -> Error {
    Error::Type(TypeError {
        expected,
        actual: actual.type_name().to_string(),
        column: None,
    })
}

macro_rules! integer_from_value {
    ($($target:ty),*) => {
        $(
            impl TryFrom<Value> for $target {
                type Error = Error;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    let wide = match value {
                        Value::SmallInt(n) => i64::from(n),
                        Value::Int(n) => i64::from(n),
                        Value::BigInt(n) => n,
                        _ => return Err(mismatch(stringify!($target), &value)),
                    };
                    <$target>::try_from(wide).map_err(|_| mismatch(stringify!($target), &value))
                }
            }
        )*
    };
}

integer_from_value!(i16, i32, i64);

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl TryFrom<Value> for f32 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Float(x) => Ok(x),
            other => other
                .as_f64()
                .map(|x| x as f32)
                .ok_or_else(|| mismatch("f32", &other)),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_f64().ok_or_else(|| mismatch("f64", &value))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Text(text) | Value::Decimal(text) => Ok(text),
            other => Err(mismatch("String", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bytes(bytes) => Ok(bytes),
            other => Err(mismatch("Vec<u8>", &other)),
        }
    }
}

impl TryFrom<Value> for serde_json::Value {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Json(json) => Ok(json),
            Value::Text(text) => serde_json::from_str(&text).map_err(|err| {
                Error::Type(TypeError {
                    expected: "JSON",
                    actual: err.to_string(),
                    column: None,
                })
            }),
            other => Err(mismatch("JSON", &other)),
        }
    }
}

impl TryFrom<Value> for NaiveDateTime {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value
            .to_datetime()
            .ok_or_else(|| mismatch("NaiveDateTime", &value))
    }
}

impl TryFrom<Value> for NaiveDate {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        NaiveDateTime::try_from(value).map(|at| at.date())
    }
}

/// NULL reads as `None`; anything else must convert to `T`.
impl<T> TryFrom<Value> for Option<T>
where
    T: TryFrom<Value, Error = Error>,
{
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if value.is_null() {
            Ok(None)
        } else {
            T::try_from(value).map(Some)
        }
    }
}
