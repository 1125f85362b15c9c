//! Tables, sequences and statement execution.

use std::collections::BTreeMap;
use std::sync::Arc;

use relmap_core::error::QueryErrorKind;
use relmap_core::row::ColumnInfo;
use relmap_core::{Error, Result, Row, Value};

use crate::eval::{self, Scope};
use crate::sql::{ColumnRef, Select, SelectItem, Statement};

/// What a statement produced.
#[derive(Debug)]
pub(crate) enum Outcome {
    Affected(u64),
    Rows(Vec<Row>),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
    }
}

/// All tables and sequences of one database.
#[derive(Debug, Clone, Default)]
pub(crate) struct Store {
    tables: BTreeMap<String, Table>,
    sequences: BTreeMap<String, i64>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn not_found(sql: &str, message: String) -> Error {
    Error::query(QueryErrorKind::NotFound, sql, message)
}

struct RowScope<'a> {
    table: &'a Table,
    table_name: &'a str,
    alias: Option<&'a str>,
    row: &'a [Value],
    sql: &'a str,
}

impl Scope for RowScope<'_> {
    fn column(&self, column: &ColumnRef) -> Result<Value> {
        let index = resolve(self.table, self.table_name, self.alias, column, self.sql)?;
        Ok(self.row[index].clone())
    }
}

fn resolve(
    table: &Table,
    table_name: &str,
    alias: Option<&str>,
    column: &ColumnRef,
    sql: &str,
) -> Result<usize> {
    if let Some(qualifier) = &column.qualifier {
        let known = alias.is_some_and(|a| a.eq_ignore_ascii_case(qualifier))
            || table_name.eq_ignore_ascii_case(qualifier);
        if !known {
            return Err(not_found(sql, format!("unknown table alias {}", qualifier)));
        }
    }
    table
        .index_of(&column.name)
        .ok_or_else(|| not_found(sql, format!("no such column: {}", column)))
}

impl Store {
    pub(crate) fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&key(name))
    }

    fn table_mut(&mut self, name: &str, sql: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(&key(name))
            .ok_or_else(|| not_found(sql, format!("no such table: {}", name)))
    }

    pub(crate) fn run(&mut self, statement: &Statement, sql: &str) -> Result<Outcome> {
        match statement {
            Statement::CreateTable { table, columns } => {
                if self.tables.contains_key(&key(table)) {
                    return Err(Error::query(
                        QueryErrorKind::Constraint,
                        sql,
                        format!("table {} already exists", table),
                    ));
                }
                self.tables.insert(
                    key(table),
                    Table {
                        columns: columns.clone(),
                        rows: Vec::new(),
                    },
                );
                Ok(Outcome::Affected(0))
            }
            Statement::CreateSequence { name, start } => {
                self.sequences.insert(key(name), *start);
                Ok(Outcome::Affected(0))
            }
            Statement::Insert {
                table,
                columns,
                values,
            } => {
                let target = self.table_mut(table, sql)?;
                let mut row = vec![Value::Null; target.columns.len()];
                for (column, value) in columns.iter().zip(values) {
                    let index = target
                        .index_of(column)
                        .ok_or_else(|| not_found(sql, format!("no such column: {}", column)))?;
                    row[index] = value.clone();
                }
                target.rows.push(row);
                Ok(Outcome::Affected(1))
            }
            Statement::Update {
                table,
                assignments,
                filter,
            } => {
                let target = self.table_mut(table, sql)?;
                let mut targets = Vec::with_capacity(assignments.len());
                for (column, value) in assignments {
                    let index = target
                        .index_of(column)
                        .ok_or_else(|| not_found(sql, format!("no such column: {}", column)))?;
                    targets.push((index, value));
                }
                let hits = matching_rows(target, table, None, filter.as_ref(), sql)?;
                for &i in &hits {
                    for (index, value) in &targets {
                        target.rows[i][*index] = (*value).clone();
                    }
                }
                Ok(Outcome::Affected(hits.len() as u64))
            }
            Statement::Delete { table, filter } => {
                let target = self.table_mut(table, sql)?;
                let hits = matching_rows(target, table, None, filter.as_ref(), sql)?;
                let mut position = 0;
                target.rows.retain(|_| {
                    let keep = hits.binary_search(&position).is_err();
                    position += 1;
                    keep
                });
                Ok(Outcome::Affected(hits.len() as u64))
            }
            Statement::NextVal(name) => {
                let next = self
                    .sequences
                    .get_mut(&key(name))
                    .ok_or_else(|| not_found(sql, format!("no such sequence: {}", name)))?;
                let value = *next;
                *next += 1;
                Ok(Outcome::Rows(vec![Row::new(
                    vec!["nextval".to_string()],
                    vec![Value::BigInt(value)],
                )]))
            }
            Statement::Select(select) => self.select(select, sql).map(Outcome::Rows),
        }
    }

    fn select(&self, select: &Select, sql: &str) -> Result<Vec<Row>> {
        let table = self
            .table(&select.table)
            .ok_or_else(|| not_found(sql, format!("no such table: {}", select.table)))?;
        let alias = select.alias.as_deref();
        let hits = matching_rows(table, &select.table, alias, select.filter.as_ref(), sql)?;

        let aggregates = select
            .items
            .iter()
            .filter(|item| matches!(item, SelectItem::Aggregate(..)))
            .count();
        if aggregates > 0 {
            if aggregates != select.items.len() {
                return Err(Error::query(
                    QueryErrorKind::Syntax,
                    sql,
                    "aggregates cannot be mixed with plain columns",
                ));
            }
            return self.aggregate_row(table, select, &hits, sql).map(|row| vec![row]);
        }

        let mut names = Vec::new();
        let mut indexes = Vec::new();
        for item in &select.items {
            match item {
                SelectItem::Wildcard => {
                    names.extend(table.columns.iter().cloned());
                    indexes.extend(0..table.columns.len());
                }
                SelectItem::Column(column) => {
                    let index = resolve(table, &select.table, alias, column, sql)?;
                    names.push(table.columns[index].clone());
                    indexes.push(index);
                }
                SelectItem::Aggregate(..) => {}
            }
        }

        let mut keyed = Vec::with_capacity(hits.len());
        for i in hits {
            let row = &table.rows[i];
            let scope = RowScope {
                table,
                table_name: &select.table,
                alias,
                row,
                sql,
            };
            let keys = select
                .order
                .iter()
                .map(|key| key.expr.eval(&scope))
                .collect::<Result<Vec<_>>>()?;
            keyed.push((keys, row));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            select
                .order
                .iter()
                .zip(a.iter().zip(b))
                .map(|(key, (x, y))| eval::order_values(x, y, key.descending))
                .find(|ordering| ordering.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let offset = usize::try_from(select.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = select
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        let columns = Arc::new(ColumnInfo::new(names));
        Ok(keyed
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, row)| {
                Row::with_columns(
                    Arc::clone(&columns),
                    indexes.iter().map(|&i| row[i].clone()).collect(),
                )
            })
            .collect())
    }

    fn aggregate_row(&self, table: &Table, select: &Select, hits: &[usize], sql: &str) -> Result<Row> {
        let mut names = Vec::with_capacity(select.items.len());
        let mut values = Vec::with_capacity(select.items.len());
        for item in &select.items {
            let SelectItem::Aggregate(function, argument) = item else {
                continue;
            };
            let column_values: Vec<Value> = match argument {
                Some(column) => {
                    let index = resolve(table, &select.table, select.alias.as_deref(), column, sql)?;
                    hits.iter().map(|&i| table.rows[i][index].clone()).collect()
                }
                None => vec![Value::Bool(true); hits.len()],
            };
            names.push(format!(
                "{}({})",
                function.name(),
                argument.as_ref().map_or_else(|| "*".to_string(), ToString::to_string)
            ));
            values.push(eval::aggregate(*function, &column_values)?);
        }
        Ok(Row::new(names, values))
    }
}

/// Indexes of rows passing `filter`, ascending.
fn matching_rows(
    table: &Table,
    table_name: &str,
    alias: Option<&str>,
    filter: Option<&crate::sql::Expr>,
    sql: &str,
) -> Result<Vec<usize>> {
    let Some(filter) = filter else {
        return Ok((0..table.rows.len()).collect());
    };
    let mut hits = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        let scope = RowScope {
            table,
            table_name,
            alias,
            row,
            sql,
        };
        if filter.matches(&scope)? {
            hits.push(i);
        }
    }
    Ok(hits)
}
