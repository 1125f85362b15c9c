//! Query specifications.

use serde::{Deserialize, Serialize};

use crate::predicate::Predicate;
use crate::sort::SortOrdering;

/// Row window of a fetch, lowered to `LIMIT n [OFFSET m]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchHint {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl FetchHint {
    pub fn limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
        }
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.offset.is_none()
    }

    /// ` LIMIT n [OFFSET m]` with its leading space, or empty.
    ///
    /// An offset without a limit uses the largest signed limit, which every
    /// common dialect accepts.
    pub fn to_sql(&self) -> String {
        match (self.limit, self.offset) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (None, Some(offset)) => format!(" LIMIT {} OFFSET {}", i64::MAX, offset),
        }
    }
}

/// What to fetch: an entity by name, an optional predicate, orderings and
/// fetch options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpecification {
    pub entity: String,
    pub predicate: Option<Predicate>,
    pub sort_orderings: Vec<SortOrdering>,
    pub fetch_hint: FetchHint,
    /// Repopulate cached objects from the fetched rows.
    pub force_refetch: bool,
    /// Relationship names to resolve eagerly in addition to the ones the
    /// entity marks as prefetched.
    pub prefetch: Vec<String>,
}

impl QuerySpecification {
    pub fn new(entity: impl Into<String>, predicate: Option<Predicate>) -> Self {
        Self {
            entity: entity.into(),
            predicate,
            sort_orderings: Vec::new(),
            fetch_hint: FetchHint::default(),
            force_refetch: false,
            prefetch: Vec::new(),
        }
    }

    /// Every row of the entity.
    pub fn all(entity: impl Into<String>) -> Self {
        Self::new(entity, None)
    }

    pub fn filter(entity: impl Into<String>, predicate: Predicate) -> Self {
        Self::new(entity, Some(predicate))
    }

    pub fn order_by(mut self, ordering: SortOrdering) -> Self {
        self.sort_orderings.push(ordering);
        self
    }

    pub fn sort_orderings(mut self, orderings: Vec<SortOrdering>) -> Self {
        self.sort_orderings = orderings;
        self
    }

    pub fn fetch_hint(mut self, hint: FetchHint) -> Self {
        self.fetch_hint = hint;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.fetch_hint.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.fetch_hint.offset = Some(offset);
        self
    }

    pub fn force_refetch(mut self, value: bool) -> Self {
        self.force_refetch = value;
        self
    }

    pub fn prefetch(mut self, relationship: impl Into<String>) -> Self {
        self.prefetch.push(relationship.into());
        self
    }

    /// The same query against another entity, as used for inheritance
    /// fan-out.
    pub fn retarget(&self, entity: impl Into<String>, predicate: Option<Predicate>) -> Self {
        Self {
            entity: entity.into(),
            predicate,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_hint_sql() {
        assert_eq!(FetchHint::default().to_sql(), "");
        assert_eq!(FetchHint::limit(5).to_sql(), " LIMIT 5");
        assert_eq!(FetchHint::limit(5).offset(10).to_sql(), " LIMIT 5 OFFSET 10");
        assert!(FetchHint::default().is_empty());
    }

    #[test]
    fn test_builder() {
        let spec = QuerySpecification::filter("User", Predicate::eq("id", 1))
            .order_by(SortOrdering::asc("name"))
            .limit(3)
            .force_refetch(true)
            .prefetch("posts");
        assert_eq!(spec.entity, "User");
        assert_eq!(spec.fetch_hint.limit, Some(3));
        assert!(spec.force_refetch);

        let child = spec.retarget("Admin", None);
        assert_eq!(child.entity, "Admin");
        assert!(child.predicate.is_none());
        assert_eq!(child.sort_orderings.len(), 1);
        assert_eq!(child.prefetch, vec!["posts".to_string()]);
    }
}
