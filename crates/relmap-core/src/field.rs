//! Field and column definitions.

use chrono::{NaiveDate, NaiveDateTime};

use crate::pattern::{self, NUMERIC_RESIDUE};
use crate::types::ValueType;
use crate::value::{SQL_DATETIME_FORMAT, Value};

/// Date format used when a field declares none and the value has no time part.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Metadata for one mapped column/property pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Object property key
    pub key: String,
    /// Database column name
    pub column: String,
    /// Declared value type
    pub value_type: ValueType,
    /// Part of the primary key
    pub primary_key: bool,
    /// Never written by insert or update
    pub read_only: bool,
    /// Participates in optimistic locking
    pub lock: bool,
    /// chrono format string for date parsing and rendering
    pub date_format: Option<String>,
}

impl Field {
    /// Create a field with minimal required data.
    pub fn new(key: impl Into<String>, column: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            key: key.into(),
            column: column.into(),
            value_type,
            primary_key: false,
            read_only: false,
            lock: false,
            date_format: None,
        }
    }

    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Mark the field as an optimistic-lock participant.
    pub fn lock(mut self, value: bool) -> Self {
        self.lock = value;
        self
    }

    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    /// Convert an arbitrary stored value to this field's declared type.
    ///
    /// Lenient: numeric targets strip stray characters before parsing, and
    /// anything that still cannot be parsed becomes `Value::Null`.
    pub fn coerce_value(&self, value: &Value) -> Value {
        coerce(value, &self.value_type, self.date_format.as_deref(), &self.key)
    }

    /// Render a value the way a predicate literal shows it: dates go through
    /// the field's format, everything else uses its textual form.
    pub fn format_value(&self, value: &Value) -> String {
        match (value, value.to_datetime()) {
            (Value::Date(_) | Value::Timestamp(_), Some(dt)) => {
                let format = self.date_format.as_deref().unwrap_or(match value {
                    Value::Date(_) => DEFAULT_DATE_FORMAT,
                    _ => SQL_DATETIME_FORMAT,
                });
                dt.format(format).to_string()
            }
            (Value::Null, _) => String::new(),
            _ => value.to_string(),
        }
    }
}

fn coerce(value: &Value, target: &ValueType, date_format: Option<&str>, key: &str) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    if let Value::Array(items) = value {
        let inner = match target {
            ValueType::Array(inner) => inner.as_ref(),
            other => other,
        };
        return Value::Array(
            items
                .iter()
                .map(|item| coerce(item, inner, date_format, key))
                .collect(),
        );
    }

    match target {
        ValueType::Text => match value {
            Value::Text(_) => value.clone(),
            other => Value::Text(other.to_string()),
        },
        ValueType::SmallInt | ValueType::Integer | ValueType::BigInt => {
            coerce_integer(value, target, key)
        }
        ValueType::Real | ValueType::Double | ValueType::Decimal => {
            coerce_float(value, target, key)
        }
        ValueType::Boolean => match value {
            Value::Bool(_) => value.clone(),
            Value::Text(s) => Value::Bool(
                s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("yes") || s == "1",
            ),
            other => match other.as_f64() {
                Some(n) => Value::Bool(n != 0.0),
                None => Value::Bool(false),
            },
        },
        ValueType::Date | ValueType::Timestamp => coerce_temporal(value, target, date_format, key),
        ValueType::Json => match value {
            Value::Json(_) => value.clone(),
            Value::Text(s) => match serde_json::from_str(s) {
                Ok(json) => Value::Json(json),
                Err(e) => {
                    tracing::warn!(field = key, error = %e, "value is not valid JSON; storing NULL");
                    Value::Null
                }
            },
            other => match serde_json::to_value(other) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::Null,
            },
        },
        ValueType::Blob => match value {
            Value::Bytes(_) => value.clone(),
            Value::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
            other => other.clone(),
        },
        ValueType::Array(inner) => Value::Array(vec![coerce(value, inner, date_format, key)]),
    }
}

/// Parse the numeric residue of a non-numeric value.
fn numeric_residue(value: &Value) -> Option<String> {
    let text = value.to_string();
    let stripped = pattern::strip(&text, NUMERIC_RESIDUE);
    if stripped.is_empty() { None } else { Some(stripped) }
}

fn coerce_integer(value: &Value, target: &ValueType, key: &str) -> Value {
    let parsed = if value.is_numeric() && !matches!(value, Value::Decimal(_)) {
        value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
    } else if let Value::Bool(b) = value {
        Some(i64::from(*b))
    } else {
        numeric_residue(value).and_then(|s| {
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        })
    };
    match parsed {
        Some(n) => match target {
            ValueType::SmallInt => Value::SmallInt(n as i16),
            ValueType::Integer => Value::Int(n as i32),
            _ => Value::BigInt(n),
        },
        None => {
            tracing::warn!(field = key, value = %value, "value does not look like a number");
            Value::Null
        }
    }
}

fn coerce_float(value: &Value, target: &ValueType, key: &str) -> Value {
    if let (ValueType::Decimal, Value::Decimal(_)) = (target, value) {
        return value.clone();
    }
    let text = if value.is_numeric() {
        Some(value.to_string())
    } else {
        numeric_residue(value)
    };
    let Some(text) = text else {
        tracing::warn!(field = key, value = %value, "value does not look like a number");
        return Value::Null;
    };
    match (target, text.parse::<f64>()) {
        (ValueType::Decimal, Ok(_)) => Value::Decimal(text),
        (ValueType::Real, Ok(f)) => Value::Float(f as f32),
        (_, Ok(f)) => Value::Double(f),
        (_, Err(_)) => {
            tracing::warn!(field = key, value = %value, "value does not look like a number");
            Value::Null
        }
    }
}

fn coerce_temporal(
    value: &Value,
    target: &ValueType,
    date_format: Option<&str>,
    key: &str,
) -> Value {
    let parsed = match value {
        Value::Date(_) | Value::Timestamp(_) => value.to_datetime(),
        Value::Text(s) if s.is_empty() => return Value::Null,
        Value::Text(s) => parse_datetime(s, date_format),
        _ => None,
    };
    match parsed {
        Some(dt) if *target == ValueType::Date => Value::from_date(dt.date()),
        Some(dt) => Value::from_datetime(dt),
        None => {
            tracing::warn!(
                field = key,
                value = %value,
                format = date_format.unwrap_or(SQL_DATETIME_FORMAT),
                "could not parse date"
            );
            Value::Null
        }
    }
}

fn parse_datetime(text: &str, date_format: Option<&str>) -> Option<NaiveDateTime> {
    let formats = match date_format {
        Some(format) => vec![format],
        None => vec![SQL_DATETIME_FORMAT, DEFAULT_DATE_FORMAT],
    };
    formats.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format).ok().or_else(|| {
            NaiveDate::parse_from_str(text, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(ty: ValueType) -> Field {
        Field::new("f", "f_col", ty)
    }

    #[test]
    fn test_builder_flags() {
        let f = Field::new("id", "ID", ValueType::BigInt)
            .primary_key(true)
            .lock(true)
            .read_only(true)
            .date_format("%d/%m/%Y");
        assert!(f.primary_key && f.lock && f.read_only);
        assert_eq!(f.date_format.as_deref(), Some("%d/%m/%Y"));
    }

    #[test]
    fn test_numeric_coercion_is_lenient() {
        let f = field(ValueType::BigInt);
        assert_eq!(f.coerce_value(&Value::Int(7)), Value::BigInt(7));
        assert_eq!(f.coerce_value(&Value::Text("#42".into())), Value::BigInt(42));
        assert_eq!(f.coerce_value(&Value::Text("n/a".into())), Value::Null);
        assert_eq!(f.coerce_value(&Value::Null), Value::Null);

        let d = field(ValueType::Double);
        assert_eq!(d.coerce_value(&Value::Text("$3.5".into())), Value::Double(3.5));
        assert_eq!(d.coerce_value(&Value::BigInt(2)), Value::Double(2.0));
    }

    #[test]
    fn test_boolean_coercion() {
        let f = field(ValueType::Boolean);
        assert_eq!(f.coerce_value(&Value::Text("YES".into())), Value::Bool(true));
        assert_eq!(f.coerce_value(&Value::Text("1".into())), Value::Bool(true));
        assert_eq!(f.coerce_value(&Value::Text("nope".into())), Value::Bool(false));
        assert_eq!(f.coerce_value(&Value::Int(0)), Value::Bool(false));
    }

    #[test]
    fn test_date_coercion_uses_field_format() {
        let f = field(ValueType::Date).date_format("%d/%m/%Y");
        let expected = Value::from_date(NaiveDate::from_ymd_opt(2021, 2, 3).unwrap());
        assert_eq!(f.coerce_value(&Value::Text("03/02/2021".into())), expected);
        assert_eq!(f.coerce_value(&Value::Text("2021-02-03".into())), Value::Null);
        assert_eq!(f.format_value(&expected), "03/02/2021");
    }

    #[test]
    fn test_timestamp_default_formats() {
        let f = field(ValueType::Timestamp);
        let v = f.coerce_value(&Value::Text("2020-01-01 10:30:00".into()));
        assert!(matches!(v, Value::Timestamp(_)));
        assert_eq!(f.format_value(&v), "2020-01-01 10:30:00");

        let midnight = f.coerce_value(&Value::Text("2020-01-01".into()));
        assert_eq!(f.format_value(&midnight), "2020-01-01 00:00:00");
    }

    #[test]
    fn test_collections_coerce_elementwise() {
        let f = field(ValueType::Array(Box::new(ValueType::Integer)));
        let v = Value::Array(vec![Value::Text("1".into()), Value::BigInt(2)]);
        assert_eq!(
            f.coerce_value(&v),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_text_target_uses_display() {
        let f = field(ValueType::Text);
        assert_eq!(f.coerce_value(&Value::BigInt(5)), Value::Text("5".into()));
    }
}
