//! Predicates over entity fields.
//!
//! A [`Predicate`] is evaluated two ways that must agree:
//!
//! - lowered to a WHERE fragment, either with bare column names
//!   ([`Predicate::generate_string`]) or alias-qualified through a
//!   [`SqlGenerationContext`] ([`Predicate::to_sql`]);
//! - evaluated in memory against a live object or a raw row, with SQL
//!   three-valued logic so `NOT` behaves the same on both sides.
//!
//! ```ignore
//! let adults = Predicate::and([
//!     Predicate::gte("age", 18),
//!     Predicate::not(Predicate::is_null("email")),
//! ]);
//! assert_eq!(
//!     adults.generate_string(&person).as_deref(),
//!     Some("(AGE >= 18 AND NOT EMAIL IS NULL)")
//! );
//! ```

use std::collections::BTreeMap;
use std::fmt;

use relmap_core::access::read;
use relmap_core::pattern::{LIKE_ESCAPE, escape_like};
use relmap_core::{Entity, Field, FieldAccess, ObjectRef, Row, Value};
use serde::{Deserialize, Serialize};

use crate::generation::SqlGenerationContext;

/// The wildcard token understood by [`Operator::Like`].
///
/// Only a leading or trailing token is honoured: the pattern is cut at the
/// token and the remaining text must be contained in the value.
pub const LIKE_WILDCARD: &str = "...";

/// Comparison operator of a leaf predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    IsNull,
    IsNotNull,
    StartsWith,
    EndsWith,
    Contains,
}

impl Operator {
    /// The SQL operator token.
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Neq => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like | Operator::StartsWith | Operator::EndsWith | Operator::Contains => {
                "LIKE"
            }
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Takes no right-hand operand.
    pub const fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    /// Only defined on text operands.
    pub const fn is_text_match(&self) -> bool {
        matches!(
            self,
            Operator::Like | Operator::StartsWith | Operator::EndsWith | Operator::Contains
        )
    }

    /// Three-valued comparison of two operands.
    ///
    /// `None` is SQL's UNKNOWN: one side NULL, incomparable kinds, or a text
    /// operator applied to non-text. Two NULLs are equal for `Eq` and not
    /// different for `Neq`.
    pub fn evaluate(&self, left: &Value, right: &Value) -> Option<bool> {
        match self {
            Operator::IsNull => return Some(left.is_null()),
            Operator::IsNotNull => return Some(!left.is_null()),
            _ => {}
        }
        match (left.is_null(), right.is_null()) {
            (true, true) => {
                return match self {
                    Operator::Eq => Some(true),
                    Operator::Neq => Some(false),
                    _ => None,
                };
            }
            (true, false) | (false, true) => return None,
            (false, false) => {}
        }

        match self {
            Operator::Eq => Some(left.loosely_eq(right)),
            Operator::Neq => Some(!left.loosely_eq(right)),
            Operator::Gt => left.compare(right).map(|o| o.is_gt()),
            Operator::Gte => left.compare(right).map(|o| o.is_ge()),
            Operator::Lt => left.compare(right).map(|o| o.is_lt()),
            Operator::Lte => left.compare(right).map(|o| o.is_le()),
            Operator::StartsWith => text_pair(left, right).map(|(l, r)| l.starts_with(r)),
            Operator::EndsWith => text_pair(left, right).map(|(l, r)| l.ends_with(r)),
            Operator::Contains => text_pair(left, right).map(|(l, r)| l.contains(r)),
            Operator::Like => text_pair(left, right).map(|(l, r)| l.contains(like_needle(r))),
            Operator::IsNull => Some(false),
            Operator::IsNotNull => Some(true),
        }
    }
}

fn text_pair<'a>(left: &'a Value, right: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((left.as_str()?, right.as_str()?))
}

/// The literal part of a `Like` pattern.
fn like_needle(pattern: &str) -> &str {
    match pattern.find(LIKE_WILDCARD) {
        Some(0) => &pattern[LIKE_WILDCARD.len()..],
        Some(index) => &pattern[..index],
        None => pattern,
    }
}

/// Column lookup for in-memory row matching.
pub trait RowValues {
    fn column_value(&self, column: &str) -> Option<&Value>;
}

impl RowValues for Row {
    fn column_value(&self, column: &str) -> Option<&Value> {
        self.get_by_name(column)
    }
}

impl RowValues for BTreeMap<String, Value> {
    fn column_value(&self, column: &str) -> Option<&Value> {
        self.get(column)
    }
}

/// A recursive boolean expression over entity fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Field compared to a literal.
    KeyValue {
        key: String,
        op: Operator,
        value: Value,
    },
    /// Field compared to another field of the same object.
    KeyKey {
        left: String,
        op: Operator,
        right: String,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    // ========================================================================
    // Construction
    // ========================================================================

    pub fn key_value(key: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Predicate::KeyValue {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    pub fn key_key(left: impl Into<String>, op: Operator, right: impl Into<String>) -> Self {
        Predicate::KeyKey {
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::key_value(key, Operator::Eq, value)
    }

    pub fn neq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::key_value(key, Operator::Neq, value)
    }

    pub fn gt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::key_value(key, Operator::Gt, value)
    }

    pub fn gte(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::key_value(key, Operator::Gte, value)
    }

    pub fn lt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::key_value(key, Operator::Lt, value)
    }

    pub fn lte(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::key_value(key, Operator::Lte, value)
    }

    /// Containment match; see [`LIKE_WILDCARD`].
    pub fn like(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::key_value(key, Operator::Like, Value::Text(pattern.into()))
    }

    pub fn starts_with(key: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::key_value(key, Operator::StartsWith, Value::Text(prefix.into()))
    }

    pub fn ends_with(key: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::key_value(key, Operator::EndsWith, Value::Text(suffix.into()))
    }

    pub fn contains(key: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::key_value(key, Operator::Contains, Value::Text(needle.into()))
    }

    pub fn is_null(key: impl Into<String>) -> Self {
        Self::key_value(key, Operator::IsNull, Value::Null)
    }

    pub fn is_not_null(key: impl Into<String>) -> Self {
        Self::key_value(key, Operator::IsNotNull, Value::Null)
    }

    pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::And(predicates.into_iter().collect())
    }

    pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Or(predicates.into_iter().collect())
    }

    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    /// Equality on every entry, `None` for an empty map.
    pub fn from_field_values<K, I>(values: I) -> Option<Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut leaves: Vec<Predicate> = values
            .into_iter()
            .map(|(key, value)| Self::eq(key, value))
            .collect();
        match leaves.len() {
            0 => None,
            1 => leaves.pop(),
            _ => Some(Predicate::And(leaves)),
        }
    }

    /// The discriminator equality a single-table child implies.
    pub fn for_inheritance(entity: &Entity) -> Option<Self> {
        let (key, value) = entity.discriminator()?;
        let value = Value::Text(value.to_string());
        let value = match entity.field_named(key) {
            Some(field) => field.coerce_value(&value),
            None => value,
        };
        Some(Self::eq(key, value))
    }

    /// Conjoin the entity's discriminator, if any, in front of `predicate`.
    ///
    /// A caller `And` is flattened into the result instead of nested.
    pub fn with_inheritance(entity: &Entity, predicate: Option<Predicate>) -> Option<Self> {
        match (Self::for_inheritance(entity), predicate) {
            (None, predicate) => predicate,
            (Some(discriminator), None) => Some(discriminator),
            (Some(discriminator), Some(Predicate::And(children))) => Some(Predicate::And(
                std::iter::once(discriminator).chain(children).collect(),
            )),
            (Some(discriminator), Some(other)) => Some(Predicate::And(vec![discriminator, other])),
        }
    }

    // ========================================================================
    // SQL lowering
    // ========================================================================

    /// WHERE fragment with alias-qualified columns.
    ///
    /// `None` when nothing renders (empty composites, unknown keys).
    pub fn to_sql(&self, entity: &Entity, ctx: &mut SqlGenerationContext) -> Option<String> {
        self.lower(entity, &mut |field| ctx.column_for_field(entity, field))
    }

    /// WHERE fragment with bare column names.
    pub fn generate_string(&self, entity: &Entity) -> Option<String> {
        self.lower(entity, &mut |field| field.column.clone())
    }

    fn lower(&self, entity: &Entity, column: &mut dyn FnMut(&Field) -> String) -> Option<String> {
        match self {
            Predicate::KeyValue { key, op, value } => {
                let field = field_for(entity, key)?;
                let name = column(field);
                Some(lower_key_value(&name, *op, value, field))
            }
            Predicate::KeyKey { left, op, right } => {
                let left = column(field_for(entity, left)?);
                let right = column(field_for(entity, right)?);
                Some(lower_key_key(&left, *op, &right))
            }
            Predicate::And(children) => lower_composite(children, " AND ", entity, column),
            Predicate::Or(children) => lower_composite(children, " OR ", entity, column),
            Predicate::Not(inner) => inner
                .lower(entity, column)
                .map(|sql| format!("NOT {}", sql)),
        }
    }

    // ========================================================================
    // In-memory evaluation
    // ========================================================================

    /// Evaluate with a property lookup. `None` is UNKNOWN.
    pub fn evaluate(&self, lookup: &dyn Fn(&str) -> Option<Value>) -> Option<bool> {
        match self {
            Predicate::KeyValue { key, op, value } => {
                let left = lookup(key)?;
                // A NULL literal lowers to IS [NOT] NULL.
                match (op, value) {
                    (Operator::Eq, Value::Null) => Operator::IsNull.evaluate(&left, value),
                    (Operator::Neq, Value::Null) => Operator::IsNotNull.evaluate(&left, value),
                    _ => op.evaluate(&left, value),
                }
            }
            Predicate::KeyKey { left, op, right } => {
                let left = lookup(left)?;
                let right = lookup(right)?;
                op.evaluate(&left, &right)
            }
            Predicate::And(children) => {
                let mut result = Some(true);
                for child in children {
                    match child.evaluate(lookup) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Predicate::Or(children) => {
                let mut result = Some(false);
                for child in children {
                    match child.evaluate(lookup) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Predicate::Not(inner) => inner.evaluate(lookup).map(|b| !b),
        }
    }

    /// Does the object satisfy the predicate?
    pub fn matches_object(&self, object: &dyn FieldAccess) -> bool {
        self.evaluate(&|key| object.get_value(key)) == Some(true)
    }

    pub fn matches(&self, object: &ObjectRef) -> bool {
        let guard = read(object);
        self.matches_object(&*guard)
    }

    /// Does a raw row of `entity` satisfy the predicate?
    ///
    /// Keys resolve to columns through the entity and raw values are coerced
    /// to the field types first, so the row compares like its object would.
    pub fn matches_row<R: RowValues + ?Sized>(&self, entity: &Entity, row: &R) -> bool {
        let lookup = |key: &str| {
            let field = entity.field_named(key)?;
            let raw = row.column_value(&field.column).unwrap_or(&Value::Null);
            Some(field.coerce_value(raw))
        };
        self.evaluate(&lookup) == Some(true)
    }

    /// The objects that satisfy the predicate, in their original order.
    pub fn filter_objects(&self, objects: &[ObjectRef]) -> Vec<ObjectRef> {
        objects
            .iter()
            .filter(|object| self.matches(object))
            .cloned()
            .collect()
    }
}

fn field_for<'e>(entity: &'e Entity, key: &str) -> Option<&'e Field> {
    let field = entity.field_named(key);
    if field.is_none() {
        tracing::warn!(entity = %entity.name, key = key, "predicate names an unknown field; dropped");
    }
    field
}

fn lower_composite(
    children: &[Predicate],
    separator: &str,
    entity: &Entity,
    column: &mut dyn FnMut(&Field) -> String,
) -> Option<String> {
    let mut parts: Vec<String> = children
        .iter()
        .filter_map(|child| child.lower(entity, column))
        .collect();
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(format!("({})", parts.join(separator))),
    }
}

fn lower_key_value(column: &str, op: Operator, value: &Value, field: &Field) -> String {
    match (op, value) {
        (Operator::IsNull, _) | (Operator::Eq, Value::Null) => format!("{} IS NULL", column),
        (Operator::IsNotNull, _) | (Operator::Neq, Value::Null) => {
            format!("{} IS NOT NULL", column)
        }
        _ => format!("{} {} {}", column, op.as_sql(), literal(op, value, field)),
    }
}

fn lower_key_key(left: &str, op: Operator, right: &str) -> String {
    match op {
        Operator::IsNull | Operator::IsNotNull => format!("{} {}", left, op.as_sql()),
        // Two NULLs are equal in memory; spell that out for the database.
        Operator::Eq => format!(
            "({l} = {r} OR ({l} IS NULL AND {r} IS NULL))",
            l = left,
            r = right
        ),
        Operator::Neq => format!(
            "({l} <> {r} AND NOT ({l} IS NULL AND {r} IS NULL))",
            l = left,
            r = right
        ),
        _ => format!("{} {} {}", left, op.as_sql(), right),
    }
}

/// A LIKE pattern around `needle`, which matches literally.
fn like_pattern(prefix: &str, needle: &str, suffix: &str) -> String {
    match escape_like(needle) {
        Some(escaped) => format!("'{prefix}{escaped}{suffix}' ESCAPE '{LIKE_ESCAPE}'"),
        None => format!("'{prefix}{needle}{suffix}'"),
    }
}

fn literal(op: Operator, value: &Value, field: &Field) -> String {
    match value {
        Value::Text(text) => match op {
            Operator::Contains => like_pattern("%", text, "%"),
            Operator::StartsWith => like_pattern("", text, "%"),
            Operator::EndsWith => like_pattern("%", text, ""),
            Operator::Like => like_pattern("%", like_needle(text), "%"),
            _ => format!("'{}'", text),
        },
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Date(_) | Value::Timestamp(_) if field.date_format.is_some() => {
            format!("'{}'", field.format_value(value))
        }
        other => other.to_sql_literal(),
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::KeyValue { key, op, .. } if op.is_unary() => {
                write!(f, "{} {}", key, op.as_sql())
            }
            Predicate::KeyValue { key, op, value } => {
                write!(f, "{} {:?} {}", key, op, value.to_sql_literal())
            }
            Predicate::KeyKey { left, op, right } => write!(f, "{} {:?} {}", left, op, right),
            Predicate::And(children) | Predicate::Or(children) => {
                let separator = if matches!(self, Predicate::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(separator)?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            Predicate::Not(inner) => write!(f, "NOT {}", inner),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use relmap_core::{
        Assign, Inheritance, RecordEvents, ValueType, object_ref,
    };

    #[derive(Debug, Default, Clone)]
    pub(crate) struct Person {
        pub id: i64,
        pub name: Option<String>,
        pub age: Option<i32>,
        pub nickname: Option<String>,
    }

    impl FieldAccess for Person {
        fn field_keys(&self) -> &'static [&'static str] {
            &["id", "name", "age", "nickname"]
        }

        fn get_value(&self, key: &str) -> Option<Value> {
            match key {
                "id" => Some(Value::from(self.id)),
                "name" => Some(Value::from(self.name.clone())),
                "age" => Some(Value::from(self.age)),
                "nickname" => Some(Value::from(self.nickname.clone())),
                _ => None,
            }
        }

        fn set_value(&mut self, key: &str, value: Value) -> Assign {
            let result = match key {
                "id" => i64::try_from(value).map(|v| self.id = v),
                "name" => Option::<String>::try_from(value).map(|v| self.name = v),
                "age" => Option::<i32>::try_from(value).map(|v| self.age = v),
                "nickname" => Option::<String>::try_from(value).map(|v| self.nickname = v),
                _ => return Assign::UnknownKey,
            };
            match result {
                Ok(()) => Assign::Applied,
                Err(e) => Assign::Rejected(e),
            }
        }
    }

    impl RecordEvents for Person {}

    pub(crate) fn person_entity() -> Entity {
        Entity::new::<Person>("Person", "people")
            .field(Field::new("id", "ID", ValueType::BigInt).primary_key(true))
            .field(Field::new("name", "NAME", ValueType::Text))
            .field(Field::new("age", "AGE", ValueType::Integer))
            .field(Field::new("nickname", "NICK", ValueType::Text))
    }

    pub(crate) fn person(id: i64, name: &str, age: Option<i32>) -> Person {
        Person {
            id,
            name: Some(name.to_string()),
            age,
            nickname: None,
        }
    }

    #[test]
    fn test_leaf_lowering() {
        let e = person_entity();
        let cases = [
            (Predicate::eq("name", "bob"), "NAME = 'bob'"),
            (Predicate::neq("age", 3), "AGE <> 3"),
            (Predicate::gte("age", 18), "AGE >= 18"),
            (Predicate::contains("name", "ob"), "NAME LIKE '%ob%'"),
            (Predicate::starts_with("name", "b"), "NAME LIKE 'b%'"),
            (Predicate::ends_with("name", "b"), "NAME LIKE '%b'"),
            (Predicate::like("name", "bo..."), "NAME LIKE '%bo%'"),
            (Predicate::like("name", "...ob"), "NAME LIKE '%ob%'"),
            (Predicate::contains("name", "a_b"), r"NAME LIKE '%a\_b%' ESCAPE '\'"),
            (Predicate::starts_with("name", "50%"), r"NAME LIKE '50\%%' ESCAPE '\'"),
            (Predicate::is_null("nickname"), "NICK IS NULL"),
            (Predicate::eq("nickname", Value::Null), "NICK IS NULL"),
            (Predicate::neq("nickname", Value::Null), "NICK IS NOT NULL"),
            (Predicate::eq("id", true), "ID = TRUE"),
        ];
        for (predicate, expected) in cases {
            assert_eq!(predicate.generate_string(&e).as_deref(), Some(expected));
        }
    }

    #[test]
    fn test_composite_lowering() {
        let e = person_entity();
        assert_eq!(Predicate::and([]).generate_string(&e), None);
        assert_eq!(Predicate::or([]).generate_string(&e), None);
        assert_eq!(
            Predicate::and([Predicate::eq("age", 1)]).generate_string(&e).as_deref(),
            Some("AGE = 1")
        );
        let p = Predicate::or([
            Predicate::eq("age", 1),
            Predicate::not(Predicate::and([Predicate::eq("name", "a"), Predicate::is_not_null("nickname")])),
        ]);
        assert_eq!(
            p.generate_string(&e).as_deref(),
            Some("(AGE = 1 OR NOT (NAME = 'a' AND NICK IS NOT NULL))")
        );
    }

    #[test]
    fn test_aliased_lowering() {
        let e = person_entity();
        let mut ctx = SqlGenerationContext::new();
        let p = Predicate::and([Predicate::is_null("nickname"), Predicate::key_key("name", Operator::Lt, "nickname")]);
        assert_eq!(
            p.to_sql(&e, &mut ctx).as_deref(),
            Some("(Person_0.NICK IS NULL AND Person_0.NAME < Person_0.NICK)")
        );
    }

    #[test]
    fn test_unknown_keys_are_dropped() {
        let e = person_entity();
        let p = Predicate::and([Predicate::eq("ghost", 1), Predicate::eq("age", 2)]);
        assert_eq!(p.generate_string(&e).as_deref(), Some("AGE = 2"));
        assert_eq!(Predicate::eq("ghost", 1).generate_string(&e), None);
    }

    #[test]
    fn test_operator_three_valued() {
        assert_eq!(Operator::Eq.evaluate(&Value::Null, &Value::Null), Some(true));
        assert_eq!(Operator::Neq.evaluate(&Value::Null, &Value::Null), Some(false));
        assert_eq!(Operator::Eq.evaluate(&Value::Int(1), &Value::Null), None);
        assert_eq!(Operator::Gt.evaluate(&Value::Null, &Value::Null), None);
        assert_eq!(Operator::Eq.evaluate(&Value::Int(2), &Value::BigInt(2)), Some(true));
        assert_eq!(Operator::Lt.evaluate(&Value::Int(2), &Value::Double(2.5)), Some(true));
        assert_eq!(Operator::Gt.evaluate(&Value::Int(2), &Value::Text("a".into())), None);
        assert_eq!(
            Operator::Contains.evaluate(&Value::Int(12), &Value::Text("1".into())),
            None
        );
        assert_eq!(Operator::IsNull.evaluate(&Value::Null, &Value::Null), Some(true));
        assert_eq!(
            Operator::Like.evaluate(&Value::Text("robert".into()), &Value::Text("...ber".into())),
            Some(true)
        );
    }

    #[test]
    fn test_matches_object() {
        let bob = person(1, "bob", Some(40));
        assert!(Predicate::gt("age", 30).matches_object(&bob));
        assert!(Predicate::is_null("nickname").matches_object(&bob));
        assert!(Predicate::eq("nickname", Value::Null).matches_object(&bob));
        assert!(!Predicate::eq("nickname", "b").matches_object(&bob));
        assert!(!Predicate::not(Predicate::eq("nickname", "b")).matches_object(&bob));
        assert!(Predicate::and([]).matches_object(&bob));
        assert!(!Predicate::or([]).matches_object(&bob));
        assert!(Predicate::or([Predicate::eq("nickname", "x"), Predicate::eq("name", "bob")]).matches_object(&bob));
    }

    #[test]
    fn test_matches_row_coerces_through_fields() {
        let e = person_entity();
        let row = Row::from_pairs([
            ("ID", Value::Int(1)),
            ("NAME", Value::Text("bob".into())),
            ("AGE", Value::Text("41".into())),
            ("NICK", Value::Null),
        ]);
        assert!(Predicate::gt("age", 40).matches_row(&e, &row));
        assert!(!Predicate::gt("age", 41).matches_row(&e, &row));
        assert!(!Predicate::eq("ghost", 1).matches_row(&e, &row));
        assert!(Predicate::eq("name", "bob").matches_row(&e, &row.to_map()));
    }

    #[test]
    fn test_filter_objects_keeps_order() {
        let objects = vec![
            object_ref(person(1, "ann", Some(20))),
            object_ref(person(2, "bob", None)),
            object_ref(person(3, "cid", Some(50))),
        ];
        let found = Predicate::gte("age", 20).filter_objects(&objects);
        assert_eq!(found.len(), 2);
        assert!(std::sync::Arc::ptr_eq(&found[1], &objects[2]));
    }

    #[test]
    fn test_from_field_values() {
        assert_eq!(Predicate::from_field_values(Vec::<(String, Value)>::new()), None);
        assert_eq!(
            Predicate::from_field_values([("id", Value::Int(1))]),
            Some(Predicate::eq("id", 1))
        );
        let p = Predicate::from_field_values([("id", Value::Int(1)), ("age", Value::Int(2))]);
        assert!(matches!(p, Some(Predicate::And(ref c)) if c.len() == 2));
    }

    #[test]
    fn test_inheritance_merging() {
        let child = person_entity()
            .field(Field::new("kind", "KIND", ValueType::Text))
            .inheritance(Inheritance::single_table("Party", "kind", "P"));
        let caller = Predicate::and([Predicate::eq("age", 1), Predicate::eq("name", "a")]);
        let merged = Predicate::with_inheritance(&child, Some(caller)).unwrap();
        assert_eq!(
            merged.generate_string(&child).as_deref(),
            Some("(KIND = 'P' AND AGE = 1 AND NAME = 'a')")
        );

        let wrapped = Predicate::with_inheritance(&child, Some(Predicate::eq("age", 1))).unwrap();
        assert_eq!(
            wrapped.generate_string(&child).as_deref(),
            Some("(KIND = 'P' AND AGE = 1)")
        );
        assert_eq!(
            Predicate::with_inheritance(&person_entity(), None),
            None
        );
    }

    #[test]
    fn test_display() {
        let p = Predicate::and([Predicate::eq("a", 1), Predicate::is_null("b")]);
        assert_eq!(p.to_string(), "(a Eq 1 AND b IS NULL)");
    }
}
