//! SELECT and aggregate statement rendering.

use relmap_core::{Entity, Error, QueryErrorKind, Result, Row, SqlCommand, Value};

use crate::generation::SqlGenerationContext;
use crate::predicate::Predicate;
use crate::spec::QuerySpecification;

/// A SELECT over one entity with alias-qualified columns.
///
/// The predicate is rendered as given; the caller merges any inheritance
/// discriminator beforehand.
#[derive(Debug)]
pub struct Select<'a> {
    entity: &'a Entity,
    spec: &'a QuerySpecification,
    ctx: SqlGenerationContext,
}

impl<'a> Select<'a> {
    pub fn new(entity: &'a Entity, spec: &'a QuerySpecification) -> Self {
        Self {
            entity,
            spec,
            ctx: SqlGenerationContext::new(),
        }
    }

    /// `SELECT A.c1, A.c2 FROM t A [WHERE ..] [ORDER BY ..] [LIMIT n [OFFSET m]]`.
    pub fn to_sql(&mut self) -> String {
        let columns = self.ctx.columns_for_entity(self.entity).join(", ");
        let alias = self.ctx.alias_for(self.entity);
        let mut sql = format!("SELECT {} FROM {} {}", columns, self.entity.table, alias);

        if let Some(clause) = self
            .spec
            .predicate
            .as_ref()
            .and_then(|p| p.to_sql(self.entity, &mut self.ctx))
        {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }

        let orderings: Vec<String> = self
            .spec
            .sort_orderings
            .iter()
            .filter_map(|ordering| ordering.to_sql(self.entity, &mut self.ctx))
            .collect();
        if !orderings.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&orderings.join(", "));
        }

        sql.push_str(&self.spec.fetch_hint.to_sql());
        sql
    }

    pub fn sql_command(&mut self) -> SqlCommand {
        SqlCommand {
            entity: self.entity.name.clone(),
            sql: self.to_sql(),
            row: Default::default(),
        }
    }
}

/// `SUM/COUNT/MIN/MAX/AVG` of one field, with unqualified columns.
#[derive(Debug, Clone)]
pub struct AggregateFunctions<'a> {
    entity: &'a Entity,
    key: String,
    predicate: Option<&'a Predicate>,
}

impl<'a> AggregateFunctions<'a> {
    pub fn new(entity: &'a Entity, key: impl Into<String>, predicate: Option<&'a Predicate>) -> Self {
        Self {
            entity,
            key: key.into(),
            predicate,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn to_sql(&self) -> Result<String> {
        let field = self.entity.field_named(&self.key).ok_or_else(|| {
            Error::Custom(format!(
                "entity {} has no field '{}' to aggregate",
                self.entity.name, self.key
            ))
        })?;
        let column = &field.column;
        let mut sql = format!(
            "SELECT SUM({c}), COUNT({c}), MIN({c}), MAX({c}), AVG({c}) FROM {}",
            self.entity.table,
            c = column
        );
        if let Some(clause) = self
            .predicate
            .and_then(|p| p.generate_string(self.entity))
        {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
        Ok(sql)
    }
}

/// The single row an aggregate statement returns.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub sum: Value,
    pub count: i64,
    pub min: Value,
    pub max: Value,
    pub avg: Value,
}

impl AggregateResult {
    /// NULL aggregates over no rows.
    pub fn empty() -> Self {
        Self {
            sum: Value::Null,
            count: 0,
            min: Value::Null,
            max: Value::Null,
            avg: Value::Null,
        }
    }

    /// Read the five projections positionally.
    pub fn from_row(row: &Row, sql: &str) -> Result<Self> {
        if row.len() < 5 {
            return Err(Error::query(
                QueryErrorKind::Shape,
                sql,
                format!("aggregate row has {} columns, expected 5", row.len()),
            ));
        }
        let at = |i: usize| row.get(i).cloned().unwrap_or(Value::Null);
        Ok(Self {
            sum: at(0),
            count: at(1).as_i64().unwrap_or(0),
            min: at(2),
            max: at(3),
            avg: at(4),
        })
    }
}
