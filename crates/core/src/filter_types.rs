//! Metadata filter types for search queries.
//!
//! Defines the filter clause evaluated by the bitmap index for filter-only
//! search and for the filter half of hybrid search.

use crate::document::MetadataValue;
use serde::{Deserialize, Serialize};

/// Metadata filter clause with `must` (AND) and `must_not` (AND-NOT) conditions.
///
/// An empty clause matches every indexed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterClause {
    #[serde(default)]
    pub must: Vec<FilterCondition>,
    #[serde(default)]
    pub must_not: Vec<FilterCondition>,
}

impl FilterClause {
    /// Clause with a single `must` condition.
    pub fn must(condition: FilterCondition) -> Self {
        Self {
            must: vec![condition],
            must_not: Vec::new(),
        }
    }

    pub fn and(mut self, condition: FilterCondition) -> Self {
        self.must.push(condition);
        self
    }

    pub fn and_not(mut self, condition: FilterCondition) -> Self {
        self.must_not.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }
}

/// A single filter condition on a metadata field.
///
/// `end` is only read by [`FilterOperator::InRange`], where the range is
/// `[value, end]` inclusive. Conditions match only values of the same type as
/// `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOperator,
    pub value: MetadataValue,
    #[serde(default)]
    pub end: Option<MetadataValue>,
}

impl FilterCondition {
    pub fn new(field: impl Into<String>, op: FilterOperator, value: MetadataValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
            end: None,
        }
    }

    pub fn equals(field: impl Into<String>, value: MetadataValue) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    pub fn in_range(field: impl Into<String>, start: MetadataValue, end: MetadataValue) -> Self {
        Self {
            field: field.into(),
            op: FilterOperator::InRange,
            value: start,
            end: Some(end),
        }
    }
}

/// Comparison operator for filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    NotEq,
    StartsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    InRange,
}
