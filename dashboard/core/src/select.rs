//! Filtering, ordering, and pagination over lists of cluster resources.
//!
//! Every list endpoint runs the same pipeline: items are filtered by name, the
//! filtered count is recorded, then the items are ordered newest-first and
//! cut down to the requested page. The order of these steps is fixed; the
//! reported total never depends on the page that was requested.

use crate::k8s::Time;
use serde::Serialize;
use std::cmp::Ordering;

/// A resource that can be selected by name and ordered by age.
pub trait Listable {
    fn name(&self) -> &str;

    fn creation_timestamp(&self) -> Option<&Time>;
}

/// Parameters for a single selection.
///
/// An empty `filter` matches every item. A non-positive `limit` or `page`
/// disables pagination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectQuery {
    pub filter: String,
    pub limit: i64,
    /// 1-based page number.
    pub page: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Selection<T> {
    pub items: Vec<T>,
    /// The number of items that matched the filter, before pagination.
    pub total: usize,
}

// === impl SelectQuery ===

impl SelectQuery {
    pub fn new(filter: impl Into<String>, limit: i64, page: i64) -> Self {
        Self {
            filter: filter.into(),
            limit,
            page,
        }
    }

    pub fn select<T: Listable>(&self, items: Vec<T>) -> Selection<T> {
        select(items, self)
    }
}

// === impl Selection ===

impl<T> Selection<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Selection<U> {
        Selection {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
        }
    }
}

pub fn select<T: Listable>(items: Vec<T>, query: &SelectQuery) -> Selection<T> {
    let mut items = filter(items, &query.filter);
    let total = items.len();
    sort(&mut items);
    let items = paginate(items, query.limit, query.page);
    Selection { items, total }
}

/// Retains the items whose name contains `name`, in their original order.
pub fn filter<T: Listable>(items: Vec<T>, name: &str) -> Vec<T> {
    if name.is_empty() {
        return items;
    }

    items
        .into_iter()
        .filter(|item| item.name().contains(name))
        .collect()
}

/// Orders items newest-first. Items without a creation timestamp sort last.
///
/// The sort is stable, so items created at the same instant keep their
/// relative order.
pub fn sort<T: Listable>(items: &mut [T]) {
    items.sort_by(|a, b| {
        match (a.creation_timestamp(), b.creation_timestamp()) {
            (Some(a_ts), Some(b_ts)) => b_ts.cmp(a_ts),
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
        }
    });
}

/// Returns the `page`th (1-based) run of `limit` items.
///
/// Pages past the end are empty; the last page may be short.
pub fn paginate<T>(items: Vec<T>, limit: i64, page: i64) -> Vec<T> {
    if limit <= 0 || page <= 0 {
        return items;
    }

    let len = items.len();
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let page = usize::try_from(page).unwrap_or(usize::MAX);
    let start = limit.saturating_mul(page - 1);
    if start >= len {
        return Vec::new();
    }
    let end = limit.saturating_mul(page).min(len);

    items.into_iter().skip(start).take(end - start).collect()
}
