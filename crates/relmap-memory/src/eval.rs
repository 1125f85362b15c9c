//! Expression evaluation with SQL three-valued logic.
//!
//! Boolean results are `Value::Bool` or `Value::Null` (unknown). A row passes
//! a `WHERE` clause only when the filter evaluates to `TRUE`.

use std::cmp::Ordering;

use relmap_core::error::QueryErrorKind;
use relmap_core::pattern::sql_like_escaped;
use relmap_core::{Error, Result, Value};

use crate::sql::{AggregateFn, ColumnRef, CompareOp, Expr};

/// Looks a column up in the current row.
pub(crate) trait Scope {
    fn column(&self, column: &ColumnRef) -> Result<Value>;
}

impl Expr {
    pub(crate) fn eval(&self, scope: &dyn Scope) -> Result<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(c) => scope.column(c),
            Expr::Compare(left, op, right) => {
                let (l, r) = (left.eval(scope)?, right.eval(scope)?);
                Ok(compare(&l, *op, &r).map_or(Value::Null, Value::Bool))
            }
            Expr::IsNull { expr, negated } => Ok(Value::Bool(expr.eval(scope)?.is_null() != *negated)),
            Expr::Like {
                expr,
                pattern,
                escape,
                negated,
            } => {
                let value = expr.eval(scope)?;
                let pattern = pattern.eval(scope)?;
                if value.is_null() || pattern.is_null() {
                    return Ok(Value::Null);
                }
                let Some(pattern) = pattern.as_str() else {
                    return Err(type_error(format!("LIKE pattern must be text, found {}", pattern)));
                };
                let escape = match escape {
                    Some(escape) => escape_char(&escape.eval(scope)?)?,
                    None => None,
                };
                let matched = match value.as_str() {
                    Some(text) => sql_like_escaped(text, pattern, escape),
                    None => sql_like_escaped(&value.to_string(), pattern, escape),
                };
                Ok(Value::Bool(matched != *negated))
            }
            Expr::And(left, right) => {
                let l = truth(&left.eval(scope)?)?;
                let r = truth(&right.eval(scope)?)?;
                Ok(match (l, r) {
                    (Some(false), _) | (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                })
            }
            Expr::Or(left, right) => {
                let l = truth(&left.eval(scope)?)?;
                let r = truth(&right.eval(scope)?)?;
                Ok(match (l, r) {
                    (Some(true), _) | (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                })
            }
            Expr::Not(inner) => Ok(truth(&inner.eval(scope)?)?.map_or(Value::Null, |b| Value::Bool(!b))),
        }
    }

    /// Does the row pass this filter?
    pub(crate) fn matches(&self, scope: &dyn Scope) -> Result<bool> {
        Ok(truth(&self.eval(scope)?)? == Some(true))
    }
}

/// The single character of an `ESCAPE` clause.
fn escape_char(value: &Value) -> Result<Option<char>> {
    let mut chars = value.as_str().unwrap_or_default().chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(Some(ch)),
        _ => Err(type_error(format!("ESCAPE must be a single character, found {}", value))),
    }
}

fn type_error(message: String) -> Error {
    Error::Query(relmap_core::error::QueryError {
        kind: QueryErrorKind::Database,
        sql: None,
        message,
        source: None,
    })
}

fn truth(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(type_error(format!("expected a boolean, found {}", other))),
    }
}

/// `None` when either side is NULL or the kinds cannot be compared.
fn compare(left: &Value, op: CompareOp, right: &Value) -> Option<bool> {
    if left.is_null() || right.is_null() {
        return None;
    }
    match op {
        CompareOp::Eq => Some(left.loosely_eq(right)),
        CompareOp::Ne => Some(!left.loosely_eq(right)),
        CompareOp::Lt => left.compare(right).map(Ordering::is_lt),
        CompareOp::Le => left.compare(right).map(Ordering::is_le),
        CompareOp::Gt => left.compare(right).map(Ordering::is_gt),
        CompareOp::Ge => left.compare(right).map(Ordering::is_ge),
    }
}

/// Sort order for one key: NULLs last ascending, first descending.
pub(crate) fn order_values(left: &Value, right: &Value, descending: bool) -> Ordering {
    let ascending = match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => left.compare(right).unwrap_or(Ordering::Equal),
    };
    if descending { ascending.reverse() } else { ascending }
}

/// Fold one aggregate over the values of a column. NULLs are ignored; an
/// empty input gives NULL for everything except `COUNT`.
pub(crate) fn aggregate(function: AggregateFn, values: &[Value]) -> Result<Value> {
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    match function {
        AggregateFn::Count => Ok(Value::BigInt(present.len() as i64)),
        AggregateFn::Min | AggregateFn::Max => {
            let want = if function == AggregateFn::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            Ok(present
                .into_iter()
                .fold(None::<&Value>, |best, v| match best {
                    Some(b) if v.compare(b) != Some(want) => Some(b),
                    _ => Some(v),
                })
                .cloned()
                .unwrap_or(Value::Null))
        }
        AggregateFn::Sum | AggregateFn::Avg => {
            if present.is_empty() {
                return Ok(Value::Null);
            }
            if present.iter().any(|v| !v.is_numeric()) {
                return Err(type_error(format!(
                    "{} needs numeric values",
                    function.name()
                )));
            }
            let integral = present.iter().all(|v| v.is_integral());
            match function {
                AggregateFn::Sum if integral => Ok(Value::BigInt(
                    present.iter().filter_map(|v| v.as_i64()).sum(),
                )),
                AggregateFn::Sum => Ok(Value::Double(
                    present.iter().filter_map(|v| v.as_f64()).sum(),
                )),
                _ => {
                    let total: f64 = present.iter().filter_map(|v| v.as_f64()).sum();
                    Ok(Value::Double(total / present.len() as f64))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{Statement, parse};

    struct Fixed(Vec<(&'static str, Value)>);

    impl Scope for Fixed {
        fn column(&self, column: &ColumnRef) -> Result<Value> {
            self.0
                .iter()
                .find(|(name, _)| *name == column.name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Error::Custom(format!("no column {}", column.name)))
        }
    }

    fn filter(sql_where: &str) -> Expr {
        match parse(&format!("SELECT * FROM t WHERE {}", sql_where)).unwrap() {
            Statement::Select(s) => s.filter.unwrap(),
            other => panic!("unexpected {:?}", other),
        }
    }

    fn row() -> Fixed {
        Fixed(vec![
            ("A", Value::BigInt(1)),
            ("B", Value::Null),
            ("NAME", Value::Text("Alice".to_string())),
        ])
    }

    #[test]
    fn test_null_comparison_is_unknown() {
        let scope = row();
        assert_eq!(filter("B = 1").eval(&scope).unwrap(), Value::Null);
        assert!(!filter("B = 1").matches(&scope).unwrap());
        assert!(!filter("NOT B = 1").matches(&scope).unwrap());
        assert!(filter("B IS NULL").matches(&scope).unwrap());
    }

    #[test]
    fn test_three_valued_connectives() {
        let scope = row();
        assert!(filter("B = 1 OR A = 1").matches(&scope).unwrap());
        assert_eq!(filter("B = 1 AND A = 1").eval(&scope).unwrap(), Value::Null);
        assert_eq!(filter("B = 1 AND A = 2").eval(&scope).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_null_safe_equality_form() {
        let scope = row();
        assert!(filter("(B = B OR (B IS NULL AND B IS NULL))").matches(&scope).unwrap());
        assert!(!filter("(A <> A AND NOT (A IS NULL AND A IS NULL))").matches(&scope).unwrap());
    }

    #[test]
    fn test_like_and_numeric_coercion() {
        let scope = row();
        assert!(filter("NAME LIKE '%lic%'").matches(&scope).unwrap());
        assert!(filter("NAME NOT LIKE 'B%'").matches(&scope).unwrap());
        assert!(filter("A = 1.0").matches(&scope).unwrap());
    }

    #[test]
    fn test_like_escape_clause() {
        let scope = row();
        assert!(filter("NAME LIKE 'Al_ce'").matches(&scope).unwrap());
        assert!(!filter(r"NAME LIKE 'Al\_ce' ESCAPE '\'").matches(&scope).unwrap());
        assert!(filter(r"NAME NOT LIKE '%\%%' ESCAPE '\'").matches(&scope).unwrap());
        assert!(filter(r"NAME LIKE 'Al!ice' ESCAPE '!'").matches(&scope).unwrap());
        assert!(filter("NAME LIKE 'A%' ESCAPE 'xy'").eval(&scope).is_err());
    }

    #[test]
    fn test_order_values_nulls() {
        let one = Value::BigInt(1);
        assert_eq!(order_values(&Value::Null, &one, false), Ordering::Greater);
        assert_eq!(order_values(&Value::Null, &one, true), Ordering::Less);
    }

    #[test]
    fn test_aggregates() {
        let values = vec![Value::BigInt(2), Value::Null, Value::BigInt(4)];
        assert_eq!(aggregate(AggregateFn::Sum, &values).unwrap(), Value::BigInt(6));
        assert_eq!(aggregate(AggregateFn::Count, &values).unwrap(), Value::BigInt(2));
        assert_eq!(aggregate(AggregateFn::Min, &values).unwrap(), Value::BigInt(2));
        assert_eq!(aggregate(AggregateFn::Max, &values).unwrap(), Value::BigInt(4));
        assert_eq!(aggregate(AggregateFn::Avg, &values).unwrap(), Value::Double(3.0));
        assert_eq!(aggregate(AggregateFn::Sum, &[]).unwrap(), Value::Null);
        assert!(aggregate(AggregateFn::Sum, &[Value::Text("x".into())]).is_err());
    }
}
