//! Query vocabulary shared by every storage driver.
//!
//! A [`Query`] is evaluated in a fixed order:
//!
//! 1. history reduction (`Latest` keeps one winner per path, by
//!    [`cmp_newest_first`])
//! 2. filter (all set fields must match)
//! 3. ordering
//! 4. `start_after` cursor
//! 5. `limit`
//!
//! [`run_query`] is the in-process evaluator used by drivers that keep rows
//! in memory. SQL drivers translate the same steps and must return the same
//! documents in the same order.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use thiserror::Error;

use crate::compare::{cmp_newest_first, cmp_path_then_newest};
use crate::crypto::Ed25519PublicKey;
use crate::document::Document;
use crate::types::{LocalIndex, Timestamp, NO_LOCAL_INDEX};

/// A query that cannot be run. This is a caller bug, not an empty result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("start_after {start_after} requires order_by {required}")]
    CursorOrderMismatch {
        start_after: &'static str,
        required: &'static str,
    },

    #[error("filter bound {0} is negative")]
    NegativeBound(&'static str),
}

/// Which versions at a path a query sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryMode {
    /// Every author's current document at each path.
    All,
    /// Only the winning document at each path.
    #[default]
    Latest,
}

/// Result ordering. Path orderings break ties newest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    PathAsc,
    PathDesc,
    LocalIndexAsc,
    LocalIndexDesc,
}

impl OrderBy {
    fn is_path(self) -> bool {
        matches!(self, OrderBy::PathAsc | OrderBy::PathDesc)
    }
}

/// Resume point for paging. Must agree with the query's [`OrderBy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartAfter {
    Path(String),
    LocalIndex(LocalIndex),
}

/// Conjunctive document filter. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub path: Option<String>,
    pub path_starts_with: Option<String>,
    pub path_ends_with: Option<String>,
    pub author: Option<Ed25519PublicKey>,
    pub timestamp: Option<Timestamp>,
    pub timestamp_gt: Option<Timestamp>,
    pub timestamp_lt: Option<Timestamp>,
    pub content_length: Option<u64>,
    pub content_length_gt: Option<u64>,
    pub content_length_lt: Option<u64>,
}

impl Filter {
    /// Whether `doc` satisfies every set field.
    pub fn matches(&self, doc: &Document) -> bool {
        let len = doc.content_length() as u64;

        if let Some(path) = &self.path {
            if &doc.path != path {
                return false;
            }
        }
        if let Some(prefix) = &self.path_starts_with {
            if !doc.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(suffix) = &self.path_ends_with {
            if !doc.path.ends_with(suffix.as_str()) {
                return false;
            }
        }
        if let Some(author) = &self.author {
            if &doc.author != author {
                return false;
            }
        }
        if self.timestamp.is_some_and(|t| doc.timestamp != t) {
            return false;
        }
        if self.timestamp_gt.is_some_and(|t| doc.timestamp <= t) {
            return false;
        }
        if self.timestamp_lt.is_some_and(|t| doc.timestamp >= t) {
            return false;
        }
        if self.content_length.is_some_and(|n| len != n) {
            return false;
        }
        if self.content_length_gt.is_some_and(|n| len <= n) {
            return false;
        }
        if self.content_length_lt.is_some_and(|n| len >= n) {
            return false;
        }
        true
    }
}

/// A declarative read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub history_mode: HistoryMode,
    pub order_by: OrderBy,
    pub start_after: Option<StartAfter>,
    /// Maximum number of documents; `None` is unbounded.
    pub limit: Option<usize>,
    pub filter: Filter,
}

impl Query {
    /// Every current document from every author.
    pub fn all() -> Self {
        Self {
            history_mode: HistoryMode::All,
            ..Default::default()
        }
    }

    /// Only the winning document at each path.
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn start_after(mut self, start_after: StartAfter) -> Self {
        self.start_after = Some(start_after);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.filter.path = Some(path.into());
        self
    }

    pub fn path_starts_with(mut self, prefix: impl Into<String>) -> Self {
        self.filter.path_starts_with = Some(prefix.into());
        self
    }

    pub fn author(mut self, author: Ed25519PublicKey) -> Self {
        self.filter.author = Some(author);
        self
    }

    /// Reject queries that cannot be evaluated.
    pub fn validate(&self) -> Result<(), QueryError> {
        match (&self.start_after, self.order_by.is_path()) {
            (Some(StartAfter::Path(_)), false) => {
                return Err(QueryError::CursorOrderMismatch {
                    start_after: "path",
                    required: "a path ordering",
                })
            }
            (Some(StartAfter::LocalIndex(_)), true) => {
                return Err(QueryError::CursorOrderMismatch {
                    start_after: "local index",
                    required: "a local index ordering",
                })
            }
            _ => {}
        }
        for (name, bound) in [
            ("timestamp", self.filter.timestamp),
            ("timestamp_gt", self.filter.timestamp_gt),
            ("timestamp_lt", self.filter.timestamp_lt),
        ] {
            if bound.is_some_and(|t| t < 0) {
                return Err(QueryError::NegativeBound(name));
            }
        }
        Ok(())
    }
}

fn local_index_of(doc: &Document) -> LocalIndex {
    doc.local_index.unwrap_or(NO_LOCAL_INDEX)
}

/// Compare two documents under `order_by`.
pub fn cmp_for_order(order_by: OrderBy, a: &Document, b: &Document) -> Ordering {
    match order_by {
        OrderBy::PathAsc => cmp_path_then_newest(a, b),
        OrderBy::PathDesc => b
            .path
            .cmp(&a.path)
            .then_with(|| cmp_newest_first(a, b)),
        OrderBy::LocalIndexAsc => local_index_of(a).cmp(&local_index_of(b)),
        OrderBy::LocalIndexDesc => local_index_of(b).cmp(&local_index_of(a)),
    }
}

fn is_after_cursor(order_by: OrderBy, cursor: &StartAfter, doc: &Document) -> bool {
    match (order_by, cursor) {
        (OrderBy::PathAsc, StartAfter::Path(p)) => doc.path.as_str() > p.as_str(),
        (OrderBy::PathDesc, StartAfter::Path(p)) => doc.path.as_str() < p.as_str(),
        (OrderBy::LocalIndexAsc, StartAfter::LocalIndex(i)) => local_index_of(doc) > *i,
        (OrderBy::LocalIndexDesc, StartAfter::LocalIndex(i)) => local_index_of(doc) < *i,
        // excluded by Query::validate
        _ => true,
    }
}

/// Keep only the winning document at each path.
pub fn reduce_to_latest<'a, I>(docs: I) -> Vec<&'a Document>
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut winners: BTreeMap<&str, &Document> = BTreeMap::new();
    for doc in docs {
        winners
            .entry(doc.path.as_str())
            .and_modify(|current| {
                if cmp_newest_first(doc, *current) == Ordering::Less {
                    *current = doc;
                }
            })
            .or_insert(doc);
    }
    winners.into_values().collect()
}

/// Evaluate `query` over an unordered set of stored documents.
pub fn run_query<'a, I>(docs: I, query: &Query) -> Result<Vec<Document>, QueryError>
where
    I: IntoIterator<Item = &'a Document>,
{
    query.validate()?;

    if query.limit == Some(0) {
        return Ok(Vec::new());
    }

    let candidates: Vec<&Document> = match query.history_mode {
        HistoryMode::All => docs.into_iter().collect(),
        HistoryMode::Latest => reduce_to_latest(docs),
    };

    let mut matched: Vec<&Document> = candidates
        .into_iter()
        .filter(|doc| query.filter.matches(doc))
        .collect();

    matched.sort_by(|a, b| cmp_for_order(query.order_by, a, b));

    let after_cursor = matched.into_iter().filter(|doc| match &query.start_after {
        Some(cursor) => is_after_cursor(query.order_by, cursor, doc),
        None => true,
    });

    let results = match query.limit {
        Some(limit) => after_cursor.take(limit).cloned().collect(),
        None => after_cursor.cloned().collect(),
    };
    Ok(results)
}
