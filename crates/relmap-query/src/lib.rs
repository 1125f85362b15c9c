//! Predicates, sort orderings and SQL generation for relmap.
//!
//! `relmap-query` is the **expression layer**. It turns entity metadata from
//! `relmap-core` into statement text and evaluates the same expressions in
//! memory.
//!
//! # Role In The Architecture
//!
//! - **Predicates**: [`Predicate`] trees lower to WHERE fragments and match
//!   live objects or raw rows with identical semantics.
//! - **Orderings**: [`SortOrdering`] lowers to ORDER BY and sorts objects.
//! - **Statements**: [`Select`] and [`AggregateFunctions`] render a
//!   [`QuerySpecification`] against one entity.
//! - **Row mapping**: [`RowMapper`] and [`ColumnMapper`] shape raw result
//!   rows for callers that bypass the identity layer.
//!
//! Execution lives in `relmap-session`.

pub mod generation;
pub mod mapper;
pub mod predicate;
pub mod select;
pub mod sort;
pub mod spec;

pub use generation::SqlGenerationContext;
pub use mapper::{ColumnMapper, RowMapper};
pub use predicate::{LIKE_WILDCARD, Operator, Predicate, RowValues};
pub use select::{AggregateFunctions, AggregateResult, Select};
pub use sort::{Direction, SortOrdering, compare_with, sort_objects, sorted_objects};
pub use spec::{FetchHint, QuerySpecification};
