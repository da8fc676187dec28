//! Filter types for memory item queries
//!
//! Builds SQL predicates for LanceDB `only_if` clauses. Every string value is
//! quoted through [`quote`] so content with apostrophes stays valid SQL.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::memory::types::MemoryKind;

/// Quote a string literal for a LanceDB SQL predicate
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Typed literal matching the `Timestamp(Microsecond, UTC)` columns.
///
/// A bare integer does not coerce to a timestamp inside a filter.
pub fn timestamp_literal(at: &DateTime<Utc>) -> String {
    format!(
        "arrow_cast({}, 'Timestamp(Microsecond, Some(\"UTC\"))')",
        at.timestamp_micros()
    )
}

/// `column IN ('a', 'b')` over a list of ids
pub fn id_list_clause(column: &str, ids: &[Uuid]) -> String {
    let list = ids
        .iter()
        .map(|id| format!("'{id}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{column} IN ({list})")
}

/// Filter criteria for memory item queries.
///
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Only active (never superseded) items
    pub active_only: bool,
    /// Exact category path
    pub category_path: Option<String>,
    /// Restrict to these kinds (OR logic)
    pub kinds: Option<Vec<MemoryKind>>,
    /// Only items created at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Items to leave out
    pub exclude_ids: Vec<Uuid>,
    /// Only items waiting for lazy triple extraction
    pub triples_pending: Option<bool>,
}

impl ItemFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for the common "active items only" filter
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    pub fn in_category(mut self, path: &str) -> Self {
        self.category_path = Some(path.to_string());
        self
    }

    pub fn with_kinds(mut self, kinds: Vec<MemoryKind>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn excluding(mut self, id: Uuid) -> Self {
        self.exclude_ids.push(id);
        self
    }

    pub fn pending_triples(mut self) -> Self {
        self.triples_pending = Some(true);
        self
    }

    /// Build a SQL WHERE clause from this filter.
    /// Returns `None` if no filters are set.
    pub fn to_sql_clause(&self) -> Option<String> {
        let mut conditions = Vec::new();

        if self.active_only {
            conditions.push("is_active = true".to_string());
        }

        if let Some(ref path) = self.category_path {
            conditions.push(format!("category_path = {}", quote(path)));
        }

        if let Some(ref kinds) = self.kinds {
            if !kinds.is_empty() {
                let in_clause = kinds
                    .iter()
                    .map(|k| format!("'{}'", k.as_str()))
                    .collect::<Vec<_>>()
                    .join(", ");
                conditions.push(format!("kind IN ({in_clause})"));
            }
        }

        if let Some(ref since) = self.since {
            conditions.push(format!("created_at >= {}", timestamp_literal(since)));
        }

        if !self.exclude_ids.is_empty() {
            conditions.push(format!("NOT ({})", id_list_clause("id", &self.exclude_ids)));
        }

        if let Some(pending) = self.triples_pending {
            conditions.push(format!("triples_pending = {pending}"));
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }
}
