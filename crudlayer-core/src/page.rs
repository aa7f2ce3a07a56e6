//! Pagination envelope and result types for `find`.
//!
//! When a caller asks for pagination, `find` answers with a [`Paginated`]
//! envelope: the requested window of records plus the total number of records
//! matching the predicate, independent of `$limit` and `$skip`. Otherwise it
//! answers with the bare sequence. [`FindResult`] carries either shape.

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// A window of results together with the true match count.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
///
/// # Example
///
/// ```ignore
/// use crudlayer::page::Paginated;
///
/// let page: Paginated<i32> = Paginated::builder(vec![1, 2])
///     .with_total(10)
///     .with_limit(Some(2))
///     .with_skip(4)
///     .build();
///
/// assert_eq!(page.data.len(), 2);
/// assert_eq!(page.total, 10);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Paginated<T> {
    /// Number of records matching the predicate, ignoring `$limit` and `$skip`.
    pub total: u64,
    /// The caller's `$limit`, verbatim. `None` when none was given.
    pub limit: Option<u64>,
    /// The caller's `$skip`, or `0`.
    pub skip: u64,
    /// The records in this window.
    pub data: Vec<T>,
}

impl<T> Paginated<T> {
    /// Creates a new builder for constructing an envelope.
    pub fn builder(data: Vec<T>) -> PaginatedBuilder<T> {
        PaginatedBuilder::new(data)
    }

    /// Transforms every record in the window, keeping the metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            total: self.total,
            limit: self.limit,
            skip: self.skip,
            data: self.data.into_iter().map(f).collect(),
        }
    }
}

impl<T> Default for Paginated<T> {
    fn default() -> Self {
        Self {
            total: 0,
            limit: None,
            skip: 0,
            data: Vec::new(),
        }
    }
}

/// Builder for constructing [`Paginated`] instances with a fluent API.
pub struct PaginatedBuilder<T> {
    data: Vec<T>,
    total: u64,
    limit: Option<u64>,
    skip: u64,
}

impl<T> PaginatedBuilder<T> {
    /// Creates a new builder with the given records.
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data,
            total: 0,
            limit: None,
            skip: 0,
        }
    }

    /// Sets the match count.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    /// Sets the requested limit.
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the requested skip.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    /// Builds and returns the final [`Paginated`] instance.
    pub fn build(self) -> Paginated<T> {
        Paginated {
            total: self.total,
            limit: self.limit,
            skip: self.skip,
            data: self.data,
        }
    }
}

/// The outcome of `find`: an envelope when pagination was requested, the bare
/// records otherwise.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FindResult<T = Record> {
    Page(Paginated<T>),
    Records(Vec<T>),
}

impl<T> FindResult<T> {
    /// The records, whichever shape was produced.
    pub fn into_records(self) -> Vec<T> {
        match self {
            FindResult::Page(page) => page.data,
            FindResult::Records(records) => records,
        }
    }

    /// The envelope, if pagination was requested.
    pub fn into_page(self) -> Option<Paginated<T>> {
        match self {
            FindResult::Page(page) => Some(page),
            FindResult::Records(_) => None,
        }
    }

    pub fn is_paginated(&self) -> bool {
        matches!(self, FindResult::Page(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_null_limit() {
        let page: Paginated<i32> = Paginated::builder(vec![]).with_total(5).build();
        let json = serde_json::to_value(&page).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "total": 5, "limit": null, "skip": 0, "data": [] })
        );
    }

    #[test]
    fn find_result_exposes_records_for_both_shapes() {
        let paged = FindResult::Page(Paginated::builder(vec![1, 2]).with_total(9).build());
        let bare: FindResult<i32> = FindResult::Records(vec![3]);

        assert!(paged.is_paginated());
        assert_eq!(paged.clone().into_records(), vec![1, 2]);
        assert_eq!(paged.into_page().map(|p| p.total), Some(9));
        assert_eq!(bare.clone().into_records(), vec![3]);
        assert!(bare.into_page().is_none());
    }
}
