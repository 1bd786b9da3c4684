//! Composable query predicates + pagination.
//!
//! Each helper conditionally chains one predicate onto a `QueryBuilder` and
//! leaves the builder untouched when its input is empty. The base query is
//! expected to already carry a `WHERE tenant_id = ...` clause, so every
//! helper appends with `AND`.
//!
//! The tag filter is special: it works from a precomputed entity-id list
//! (tag membership is resolved first, against the tag-link table). When tags
//! are selected but nothing matched, it short-circuits with
//! [`FilterOutcome::Empty`] instead of emitting `IN ()`.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

/// Page request with clamped size.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

pub const DEFAULT_PER_PAGE: u32 = 25;
pub const MAX_PER_PAGE: u32 = 100;

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }

    /// Slice a fully materialized list (in-memory backend).
    pub fn slice<T: Clone>(&self, items: &[T]) -> Vec<T> {
        items
            .iter()
            .skip(self.offset() as usize)
            .take(self.per_page as usize)
            .cloned()
            .collect()
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn empty(pagination: Pagination) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page: pagination.page,
            per_page: pagination.per_page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

/// Result of a filter step that can prove the result set empty.
#[must_use]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Keep building/executing the query.
    Continue,
    /// No row can match; skip the query entirely.
    Empty,
}

/// Text search: one `AND (a ILIKE %term% OR b ILIKE %term% ...)` group.
///
/// An empty or whitespace-only term leaves the query untouched.
pub fn push_search(qb: &mut QueryBuilder<'_, Postgres>, term: &str, columns: &[&str]) {
    let term = term.trim();
    if term.is_empty() || columns.is_empty() {
        return;
    }

    let pattern = format!("%{term}%");
    qb.push(" AND (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push(*column);
        qb.push(" ILIKE ");
        qb.push_bind(pattern.clone());
    }
    qb.push(")");
}

/// Membership: `AND column IN (...)`. Empty list leaves the query untouched.
pub fn push_in_uuid(qb: &mut QueryBuilder<'_, Postgres>, column: &str, ids: &[Uuid]) {
    if ids.is_empty() {
        return;
    }

    qb.push(" AND ");
    qb.push(column);
    qb.push(" IN (");
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push_bind(*id);
    }
    qb.push(")");
}

/// Equality: `AND column = value`.
pub fn push_eq_text(qb: &mut QueryBuilder<'_, Postgres>, column: &str, value: Option<&str>) {
    if let Some(value) = value {
        qb.push(" AND ");
        qb.push(column);
        qb.push(" = ");
        qb.push_bind(value.to_string());
    }
}

/// Inclusive date range over a timestamp column; either bound is optional.
pub fn push_date_range(
    qb: &mut QueryBuilder<'_, Postgres>,
    column: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) {
    if let Some(from) = from {
        qb.push(" AND ");
        qb.push(column);
        qb.push(" >= ");
        qb.push_bind(from);
    }
    if let Some(to) = to {
        qb.push(" AND ");
        qb.push(column);
        qb.push(" <= ");
        qb.push_bind(to);
    }
}

/// Null-presence: `AND column IS [NOT] NULL`.
pub fn push_null_presence(qb: &mut QueryBuilder<'_, Postgres>, column: &str, present: Option<bool>) {
    match present {
        Some(true) => {
            qb.push(" AND ");
            qb.push(column);
            qb.push(" IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND ");
            qb.push(column);
            qb.push(" IS NULL");
        }
        None => {}
    }
}

/// Tag membership via a precomputed entity-id list.
///
/// `tags_selected` states whether the caller filtered by tags at all;
/// `entity_ids` is the resolved membership. Selected tags with an empty
/// resolution prove the result set empty without touching the query.
pub fn apply_tag_filter(
    qb: &mut QueryBuilder<'_, Postgres>,
    id_column: &str,
    tags_selected: bool,
    entity_ids: &[Uuid],
) -> FilterOutcome {
    if !tags_selected {
        return FilterOutcome::Continue;
    }
    if entity_ids.is_empty() {
        return FilterOutcome::Empty;
    }

    push_in_uuid(qb, id_column, entity_ids);
    FilterOutcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "SELECT * FROM organizations WHERE tenant_id = $1";

    fn builder() -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT * FROM organizations WHERE tenant_id = ");
        qb.push_bind(Uuid::nil());
        qb
    }

    #[test]
    fn empty_search_leaves_the_query_unchanged() {
        let mut qb = builder();
        push_search(&mut qb, "   ", &["name", "email"]);
        assert_eq!(qb.sql(), BASE);
    }

    #[test]
    fn search_emits_exactly_one_or_group_over_all_columns() {
        let mut qb = builder();
        push_search(&mut qb, "acme", &["name", "email", "cnpj"]);

        let sql = qb.sql();
        assert_eq!(sql.matches("ILIKE").count(), 3);
        assert_eq!(sql.matches(" AND (").count(), 1);
        assert_eq!(sql.matches(" OR ").count(), 2);
    }

    #[test]
    fn in_list_binds_each_id() {
        let mut qb = builder();
        push_in_uuid(&mut qb, "owner_id", &[Uuid::nil(), Uuid::nil()]);

        let sql = qb.sql();
        assert!(sql.contains("owner_id IN ($2, $3)"));
    }

    #[test]
    fn empty_in_list_leaves_the_query_unchanged() {
        let mut qb = builder();
        push_in_uuid(&mut qb, "owner_id", &[]);
        assert_eq!(qb.sql(), BASE);
    }

    #[test]
    fn date_range_pushes_only_present_bounds() {
        let mut qb = builder();
        push_date_range(&mut qb, "created_at", Some(Utc::now()), None);
        let sql = qb.sql();
        assert!(sql.contains("created_at >= $2"));
        assert!(!sql.contains("created_at <="));
    }

    #[test]
    fn null_presence_emits_is_null_checks() {
        let mut qb = builder();
        push_null_presence(&mut qb, "cnpj", Some(true));
        assert!(qb.sql().contains("cnpj IS NOT NULL"));

        let mut qb = builder();
        push_null_presence(&mut qb, "cnpj", Some(false));
        assert!(qb.sql().contains("cnpj IS NULL"));

        let mut qb = builder();
        push_null_presence(&mut qb, "cnpj", None);
        assert_eq!(qb.sql(), BASE);
    }

    #[test]
    fn no_selected_tags_leaves_the_query_unchanged() {
        let mut qb = builder();
        let outcome = apply_tag_filter(&mut qb, "id", false, &[]);
        assert_eq!(outcome, FilterOutcome::Continue);
        assert_eq!(qb.sql(), BASE);
    }

    #[test]
    fn selected_tags_with_no_members_short_circuit() {
        let mut qb = builder();
        let outcome = apply_tag_filter(&mut qb, "id", true, &[]);
        assert_eq!(outcome, FilterOutcome::Empty);
        assert_eq!(qb.sql(), BASE);
    }

    #[test]
    fn selected_tags_with_members_emit_the_in_list() {
        let mut qb = builder();
        let ids = vec![Uuid::nil()];
        let outcome = apply_tag_filter(&mut qb, "id", true, &ids);
        assert_eq!(outcome, FilterOutcome::Continue);
        assert!(qb.sql().contains("id IN ($2)"));
    }

    #[test]
    fn pagination_clamps_size_and_floors_page() {
        let p = Pagination::new(0, 10_000);
        assert_eq!(p.page, 1);
        assert_eq!(p.per_page, MAX_PER_PAGE);
        assert_eq!(p.offset(), 0);

        let p = Pagination::new(3, 25);
        assert_eq!(p.offset(), 50);
        assert_eq!(p.limit(), 25);
    }

    #[test]
    fn pagination_slices_materialized_lists() {
        let items: Vec<i32> = (0..10).collect();
        let p = Pagination::new(2, 4);
        assert_eq!(p.slice(&items), vec![4, 5, 6, 7]);
    }
}
