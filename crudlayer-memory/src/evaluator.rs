//! Predicate evaluation over in-memory records.
//!
//! This module is the reference semantics every compiled backend is measured
//! against. A missing field reads as `null`; `$eq`/`$ne`/`$in`/`$nin` are
//! null-safe; ordering operators never match across types or against `null`.

use std::{
    cmp::Ordering,
    collections::{HashMap, hash_map::Entry},
};

use bson::{Bson, DateTime, Document};
use regex::Regex;

use crudlayer_core::{
    error::{AdapterError, AdapterResult},
    pattern::{LikePattern, search_terms},
    query::{Operator, Predicate, PredicateVisitor, Sort, SortDirection},
    record::lookup,
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to `f64` so that an `Int32` operand matches an
/// `Int64` or `Double` stored value of the same magnitude.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value, also used for missing fields
    Null,
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// String value
    String(&'a str),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Everything else (binary, object ids, ...) compared as raw BSON
    Other(&'a Bson),
    /// Boolean value
    Bool(bool),
    /// DateTime value
    DateTime(DateTime),
}

impl<'a> Comparable<'a> {
    /// Position in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Other(Bson::Binary(_)) => 5,
            Comparable::Other(Bson::ObjectId(_)) => 6,
            Comparable::Other(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
        }
    }

    /// Total order used by `$sort`: type rank first, then value.
    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank()).then_with(|| match (self, other) {
            (Comparable::Number(a), Comparable::Number(b)) => a.total_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.cmp(b),
            (Comparable::Array(a), Comparable::Array(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x.sort_cmp(y))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Comparable::Other(Bson::ObjectId(a)), Comparable::Other(Bson::ObjectId(b))) => {
                a.bytes().cmp(&b.bytes())
            }
            (Comparable::Other(Bson::Binary(a)), Comparable::Other(Bson::Binary(b))) => {
                a.bytes.cmp(&b.bytes)
            }
            _ => Ordering::Equal,
        })
    }
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> From<Option<&'a Bson>> for Comparable<'a> {
    fn from(bson: Option<&'a Bson>) -> Self {
        bson.map(Comparable::from).unwrap_or(Comparable::Null)
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

/// Ordering used by `$lt`/`$lte`/`$gt`/`$gte`: only defined within a type.
impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Compiled `%`-patterns, keyed by pattern and case sensitivity.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: HashMap<(String, bool), Regex>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&mut self, pattern: &str, case_insensitive: bool) -> AdapterResult<&Regex> {
        match self.compiled.entry((pattern.to_string(), case_insensitive)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let regex = Regex::new(&LikePattern::new(pattern).to_regex(case_insensitive))
                    .map_err(|e| AdapterError::BadRequest(format!("invalid pattern {pattern:?}: {e}")))?;

                Ok(entry.insert(regex))
            }
        }
    }
}

/// Evaluates a predicate against one record.
pub struct RecordEvaluator<'a> {
    record: &'a Document,
    patterns: &'a mut PatternCache,
}

impl<'a> RecordEvaluator<'a> {
    pub fn new(record: &'a Document, patterns: &'a mut PatternCache) -> Self {
        Self { record, patterns }
    }

    pub fn evaluate(&mut self, predicate: &Predicate) -> AdapterResult<bool> {
        self.visit(predicate)
    }

    fn like(&mut self, stored: &Bson, pattern: &Bson, case_insensitive: bool) -> AdapterResult<bool> {
        match (stored, pattern) {
            (Bson::String(text), Bson::String(pattern)) => {
                Ok(self.patterns.get(pattern, case_insensitive)?.is_match(text))
            }
            _ => Ok(false),
        }
    }
}

impl<'a> PredicateVisitor for RecordEvaluator<'a> {
    type Output = bool;
    type Error = AdapterError;

    fn visit_and(&mut self, children: &[Predicate]) -> Result<Self::Output, Self::Error> {
        for child in children {
            if !self.visit(child)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, children: &[Predicate]) -> Result<Self::Output, Self::Error> {
        for child in children {
            if self.visit(child)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_compare(&mut self, field: &str, op: Operator, value: &Bson) -> Result<Self::Output, Self::Error> {
        let stored = lookup(self.record, field).unwrap_or(&Bson::Null);
        let left = Comparable::from(stored);

        Ok(match op {
            Operator::Eq | Operator::Is => left == Comparable::from(value),
            Operator::Ne | Operator::IsNot => left != Comparable::from(value),
            Operator::In | Operator::Nin => {
                let found = match value {
                    Bson::Array(items) => items.iter().any(|item| left == Comparable::from(item)),
                    _ => false,
                };

                found == (op == Operator::In)
            }
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
                match left.partial_cmp(&Comparable::from(value)) {
                    Some(ordering) => match op {
                        Operator::Lt => ordering.is_lt(),
                        Operator::Lte => ordering.is_le(),
                        Operator::Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    },
                    None => false,
                }
            }
            Operator::Like => self.like(stored, value, false)?,
            Operator::ILike => self.like(stored, value, true)?,
            Operator::NotLike => !self.like(stored, value, false)?,
            Operator::NotILike => !self.like(stored, value, true)?,
            Operator::Search => match (stored, value) {
                (Bson::String(text), Bson::String(terms)) => {
                    let text = text.to_lowercase();

                    search_terms(terms).iter().all(|term| text.contains(term.as_str()))
                }
                _ => false,
            },
        })
    }
}

/// Returns whether `record` satisfies `predicate`.
///
/// # Errors
///
/// Returns [`AdapterError::BadRequest`] if a pattern cannot be compiled.
pub fn matches(record: &Document, predicate: &Predicate) -> AdapterResult<bool> {
    RecordEvaluator::new(record, &mut PatternCache::new()).evaluate(predicate)
}

/// Keeps the records satisfying `predicate`, preserving order.
pub fn filter_records<'r>(
    records: impl IntoIterator<Item = &'r Document>,
    predicate: &Predicate,
) -> AdapterResult<Vec<&'r Document>> {
    let mut patterns = PatternCache::new();
    let mut matched = Vec::new();

    for record in records {
        if RecordEvaluator::new(record, &mut patterns).evaluate(predicate)? {
            matched.push(record);
        }
    }

    Ok(matched)
}

/// Orders two records by the given sort keys. Missing fields sort as `null`,
/// which comes first in ascending order.
pub fn compare_records(left: &Document, right: &Document, sort: &[Sort]) -> Ordering {
    sort.iter()
        .map(|key| {
            let ordering = Comparable::from(lookup(left, &key.field))
                .sort_cmp(&Comparable::from(lookup(right, &key.field)));

            match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use bson::{doc, oid::ObjectId};
    use crudlayer_core::query::{Filter, Query};

    use super::*;

    fn check(record: &Document, query: Document) -> bool {
        matches(record, &Query::parse(&query).unwrap().predicate).unwrap()
    }

    #[test]
    fn missing_field_reads_as_null() {
        let record = doc! { "name": "Dave" };

        assert!(check(&record, doc! { "age": null }));
        assert!(check(&record, doc! { "age": { "$ne": 3 } }));
        assert!(check(&record, doc! { "age": { "$nin": [3] } }));
        assert!(!check(&record, doc! { "age": { "$in": [3] } }));
        assert!(check(&record, doc! { "age": { "$in": [3, null] } }));
    }

    #[test]
    fn ordering_never_crosses_types() {
        let record = doc! { "age": "32" };

        assert!(!check(&record, doc! { "age": { "$gt": 10 } }));
        assert!(!check(&record, doc! { "age": { "$lt": 10 } }));
        assert!(check(&record, doc! { "age": { "$gt": "10" } }));
    }

    #[test]
    fn numbers_compare_across_widths() {
        let record = doc! { "age": 32_i64 };

        assert!(check(&record, doc! { "age": 32 }));
        assert!(check(&record, doc! { "age": { "$gte": 32.0 } }));
    }

    #[test]
    fn like_family() {
        let record = doc! { "name": "Alice" };

        assert!(check(&record, doc! { "name": { "$like": "A%" } }));
        assert!(!check(&record, doc! { "name": { "$like": "a%" } }));
        assert!(check(&record, doc! { "name": { "$ilike": "a%E" } }));
        assert!(check(&record, doc! { "name": { "$notlike": "B%" } }));
        assert!(!check(&record, doc! { "name": { "$notilike": "%LIC%" } }));
        assert!(check(&doc! {}, doc! { "name": { "$notlike": "A%" } }));
        assert!(!check(&doc! { "name": "A.ice" }, doc! { "name": { "$like": "A.ic" } }));
    }

    #[test]
    fn search_requires_every_term() {
        let record = doc! { "title": "The Quick brown Fox" };

        assert!(check(&record, doc! { "title": { "$search": "quick fox" } }));
        assert!(!check(&record, doc! { "title": { "$search": "quick dog" } }));
    }

    #[test]
    fn dotted_paths_resolve_nested_fields() {
        let record = doc! { "address": { "city": "Oslo" } };

        assert!(check(&record, doc! { "address.city": "Oslo" }));
        assert!(!check(&record, doc! { "address.city": "Bergen" }));
    }

    #[test]
    fn empty_groups() {
        let record = doc! { "a": 1 };

        assert!(matches(&record, &Filter::and(vec![])).unwrap());
        assert!(!matches(&record, &Filter::or(vec![])).unwrap());
    }

    #[test]
    fn sort_puts_nulls_first_and_ranks_types() {
        let sort = [Sort { field: "v".into(), direction: SortDirection::Asc }];
        let mut records = vec![
            doc! { "v": true },
            doc! { "v": "b" },
            doc! { "v": 2 },
            doc! {},
            doc! { "v": ObjectId::new() },
            doc! { "v": 1.5 },
        ];

        records.sort_by(|a, b| compare_records(a, b, &sort));

        assert_eq!(records[0], doc! {});
        assert_eq!(records[1], doc! { "v": 1.5 });
        assert_eq!(records[2], doc! { "v": 2 });
        assert_eq!(records[3], doc! { "v": "b" });
        assert!(matches!(records[4].get("v"), Some(Bson::ObjectId(_))));
        assert_eq!(records[5], doc! { "v": true });
    }

    #[test]
    fn sort_keys_apply_in_order() {
        let sort = [
            Sort { field: "a".into(), direction: SortDirection::Asc },
            Sort { field: "b".into(), direction: SortDirection::Desc },
        ];
        let mut records = vec![doc! { "a": 1, "b": 1 }, doc! { "a": 0, "b": 0 }, doc! { "a": 1, "b": 2 }];

        records.sort_by(|x, y| compare_records(x, y, &sort));

        assert_eq!(
            records,
            vec![doc! { "a": 0, "b": 0 }, doc! { "a": 1, "b": 2 }, doc! { "a": 1, "b": 1 }]
        );
    }
}
