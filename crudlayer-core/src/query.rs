//! The query language: predicate model, filter separator and visitor.
//!
//! Callers describe what they want as a BSON document:
//!
//! ```ignore
//! use bson::doc;
//!
//! let raw = doc! {
//!     "name": "Alice",
//!     "age": { "$gte": 18, "$lt": 65 },
//!     "$or": [{ "role": "admin" }, { "role": { "$in": ["owner", "editor"] } }],
//!     "$select": ["name", "role"],
//!     "$sort": { "age": -1 },
//!     "$limit": 10,
//! };
//!
//! let query = Query::parse(&raw)?;
//! ```
//!
//! [`Query::parse`] separates the four directives (`$select`, `$sort`, `$limit`,
//! `$skip`) from the predicate and validates every operator. What comes out is
//! a [`Predicate`] tree that no backend can misread: an implicit AND at the
//! root, explicit [`Predicate::And`]/[`Predicate::Or`] nodes for `$and`/`$or`,
//! and one [`Predicate::Compare`] leaf per field/operator pair.
//!
//! Backends consume predicates through [`PredicateVisitor`]. The in-memory
//! evaluator implements it to produce a `bool`; the SQL and MongoDB compilers
//! implement it to produce their native filter fragments.
//!
//! # Builder API
//!
//! The same documents can be assembled programmatically:
//!
//! ```ignore
//! use crudlayer::query::{Query, Filter, SortDirection};
//!
//! let raw = Query::builder()
//!     .filter(Filter::eq("name", "Alice").and(Filter::gt("age", 18)))
//!     .select(["name"])
//!     .sort("age", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//! ```

use std::fmt;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};

/// Reserved directive keys, only valid at the top level of a query.
pub const DIRECTIVE_KEYS: [&str; 4] = ["$select", "$sort", "$limit", "$skip"];

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// Sort specification for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field operators accepted inside an operator map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Literal equality. Produced for non-operator field values.
    Eq,
    /// `$ne`
    Ne,
    /// `$in`
    In,
    /// `$nin`
    Nin,
    /// `$lt`
    Lt,
    /// `$lte`
    Lte,
    /// `$gt`
    Gt,
    /// `$gte`
    Gte,
    /// `$like`, case-sensitive `%` pattern.
    Like,
    /// `$notlike`
    NotLike,
    /// `$ilike`, case-insensitive `%` pattern.
    ILike,
    /// `$notilike`
    NotILike,
    /// `$is`, null-safe equality.
    Is,
    /// `$isnot`, null-safe inequality.
    IsNot,
    /// `$search`, case-insensitive containment of every whitespace-separated term.
    Search,
}

impl Operator {
    /// Every operator that may appear as a key in an operator map.
    pub const KEYED: [Operator; 14] = [
        Operator::Ne,
        Operator::In,
        Operator::Nin,
        Operator::Lt,
        Operator::Lte,
        Operator::Gt,
        Operator::Gte,
        Operator::Like,
        Operator::NotLike,
        Operator::ILike,
        Operator::NotILike,
        Operator::Is,
        Operator::IsNot,
        Operator::Search,
    ];

    /// The query-language key for this operator.
    pub fn key(self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Like => "$like",
            Operator::NotLike => "$notlike",
            Operator::ILike => "$ilike",
            Operator::NotILike => "$notilike",
            Operator::Is => "$is",
            Operator::IsNot => "$isnot",
            Operator::Search => "$search",
        }
    }

    /// Looks up an operator by its key. `$eq` is not a keyed operator: equality
    /// is written as a plain field value.
    pub fn from_key(key: &str) -> Option<Self> {
        Operator::KEYED.into_iter().find(|op| op.key() == key)
    }

    /// Whether this is one of `$lt`, `$lte`, `$gt`, `$gte`.
    pub fn is_ordering(self) -> bool {
        matches!(self, Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte)
    }

    /// Whether this is one of the `$like` family.
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            Operator::Like | Operator::NotLike | Operator::ILike | Operator::NotILike
        )
    }

    fn validate(self, field: &str, value: &Bson) -> AdapterResult<()> {
        let ok = match self {
            Operator::In | Operator::Nin => matches!(value, Bson::Array(_)),
            op if op.is_ordering() => !matches!(value, Bson::Null),
            op if op.is_pattern() => matches!(value, Bson::String(_)),
            Operator::Search => matches!(value, Bson::String(s) if !s.trim().is_empty()),
            _ => true,
        };

        if ok {
            return Ok(());
        }

        let expected = match self {
            Operator::In | Operator::Nin => "an array",
            Operator::Search => "a non-empty string",
            op if op.is_pattern() => "a string",
            _ => "a non-null value",
        };

        Err(AdapterError::BadRequest(format!(
            "{} on field '{}' expects {}, got {:?}",
            self.key(),
            field,
            expected,
            value
        )))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A backend-neutral boolean condition over record fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every child must match. An empty list matches everything.
    And(Vec<Predicate>),
    /// At least one child must match. An empty list matches nothing.
    Or(Vec<Predicate>),
    /// A single field/operator/value test.
    Compare {
        /// The field name, possibly a dotted path.
        field: String,
        /// The operator.
        op: Operator,
        /// The operand.
        value: Bson,
    },
}

impl Predicate {
    /// A predicate matching every record.
    pub fn all() -> Self {
        Predicate::And(Vec::new())
    }

    /// Creates a field comparison.
    pub fn compare(field: impl Into<String>, op: Operator, value: impl Into<Bson>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Combines this predicate with another using logical AND.
    ///
    /// If this predicate is already an AND, the other predicate is appended
    /// to the list. Otherwise, a new AND is created.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut list) => {
                list.push(other);
                Predicate::And(list)
            }
            _ => Predicate::And(vec![self, other]),
        }
    }

    /// Combines this predicate with another using logical OR.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut list) => {
                list.push(other);
                Predicate::Or(list)
            }
            _ => Predicate::Or(vec![self, other]),
        }
    }

    /// True when the predicate places no constraint on records.
    pub fn is_unconstrained(&self) -> bool {
        match self {
            Predicate::And(children) => children.iter().all(Predicate::is_unconstrained),
            _ => false,
        }
    }

    /// Equality constraints on `field` found among the root AND's direct children.
    pub fn equality_constraints<'a>(&'a self, field: &'a str) -> Vec<&'a Bson> {
        let children: &[Predicate] = match self {
            Predicate::And(children) => children,
            other => std::slice::from_ref(other),
        };

        children
            .iter()
            .filter_map(|child| match child {
                Predicate::Compare { field: name, op: Operator::Eq | Operator::Is, value }
                    if name == field => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Rewrites the operands of root-level clauses on `field` through `f`.
    ///
    /// Set operators have each member rewritten. Used to coerce identifiers into
    /// a backend's native id type.
    pub fn map_field_values(self, field: &str, f: &impl Fn(Bson) -> Bson) -> Self {
        match self {
            Predicate::And(children) => Predicate::And(
                children
                    .into_iter()
                    .map(|child| match child {
                        Predicate::Compare { .. } => child.map_field_values(field, f),
                        other => other,
                    })
                    .collect(),
            ),
            Predicate::Compare { field: name, op, value } if name == field => {
                let value = match (op, value) {
                    (Operator::In | Operator::Nin, Bson::Array(items)) => {
                        Bson::Array(items.into_iter().map(f).collect())
                    }
                    (Operator::Eq | Operator::Ne | Operator::Is | Operator::IsNot, value) => f(value),
                    (_, value) => value,
                };

                Predicate::Compare { field: name, op, value }
            }
            other => other,
        }
    }

    /// Walks the tree and returns every comparison using `op`.
    pub fn find_operator(&self, op: Operator) -> Vec<&Predicate> {
        let mut found = Vec::new();
        self.collect_operator(op, &mut found);
        found
    }

    fn collect_operator<'a>(&'a self, op: Operator, found: &mut Vec<&'a Predicate>) {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_operator(op, found);
                }
            }
            Predicate::Compare { op: this, .. } if *this == op => found.push(self),
            Predicate::Compare { .. } => {}
        }
    }

    /// Renders the predicate back into the query language.
    pub fn to_document(&self) -> Document {
        match self {
            Predicate::And(children) => bson::doc! {
                "$and": children.iter().map(|c| Bson::Document(c.to_document())).collect::<Vec<_>>(),
            },
            Predicate::Or(children) => bson::doc! {
                "$or": children.iter().map(|c| Bson::Document(c.to_document())).collect::<Vec<_>>(),
            },
            Predicate::Compare { field, op: Operator::Eq, value } => {
                let mut doc = Document::new();
                doc.insert(field.clone(), value.clone());
                doc
            }
            Predicate::Compare { field, op, value } => {
                let mut inner = Document::new();
                inner.insert(op.key(), value.clone());

                let mut doc = Document::new();
                doc.insert(field.clone(), inner);
                doc
            }
        }
    }
}

/// Non-predicate instructions: projection, ordering and windowing.
///
/// Every field is `None` when the caller did not supply the directive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directives {
    /// `$select`: fields to project. The identifier is always added back.
    pub select: Option<Vec<String>>,
    /// `$sort`: ordered sort keys.
    pub sort: Option<Vec<Sort>>,
    /// `$limit`: maximum number of rows. `Some(0)` returns no rows.
    pub limit: Option<u64>,
    /// `$skip`: number of rows to skip.
    pub skip: Option<u64>,
}

impl Directives {
    pub fn sort_keys(&self) -> &[Sort] {
        self.sort.as_deref().unwrap_or(&[])
    }
}

/// A parsed query: the predicate plus the directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// The filter condition.
    pub predicate: Predicate,
    /// Projection, sort and windowing.
    pub directives: Directives,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            predicate: Predicate::all(),
            directives: Directives::default(),
        }
    }
}

impl Query {
    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Splits a raw query document into its predicate and directives.
    ///
    /// # Arguments
    ///
    /// * `raw` - The query document as supplied by the caller
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BadRequest`] when:
    ///
    /// - an operator map contains an unknown `$` key, or mixes operators with plain keys
    /// - an operator's operand has the wrong shape (`$in` without an array, ...)
    /// - a directive is malformed or appears inside `$and`/`$or`
    /// - `$and`/`$or` do not hold an array of documents
    pub fn parse(raw: &Document) -> AdapterResult<Query> {
        let mut directives = Directives::default();
        let mut clauses = Vec::new();

        for (key, value) in raw {
            match key.as_str() {
                "$select" => directives.select = Some(parse_select(value)?),
                "$sort" => directives.sort = Some(parse_sort(value)?),
                "$limit" => directives.limit = Some(parse_count(key, value)?),
                "$skip" => directives.skip = Some(parse_count(key, value)?),
                _ => clauses.extend(parse_clause(key, value)?),
            }
        }

        Ok(Query {
            predicate: Predicate::And(clauses),
            directives,
        })
    }
}

fn parse_nested(raw: &Document) -> AdapterResult<Predicate> {
    let mut clauses = Vec::new();

    for (key, value) in raw {
        if DIRECTIVE_KEYS.contains(&key.as_str()) {
            return Err(AdapterError::BadRequest(format!(
                "{key} is only allowed at the top level of a query"
            )));
        }

        clauses.extend(parse_clause(key, value)?);
    }

    Ok(match clauses.len() {
        1 => clauses.remove(0),
        _ => Predicate::And(clauses),
    })
}

fn parse_clause(key: &str, value: &Bson) -> AdapterResult<Vec<Predicate>> {
    match key {
        "$and" => Ok(vec![Predicate::And(parse_branches(key, value)?)]),
        "$or" => Ok(vec![Predicate::Or(parse_branches(key, value)?)]),
        _ => parse_field(key, value),
    }
}

fn parse_branches(key: &str, value: &Bson) -> AdapterResult<Vec<Predicate>> {
    let Bson::Array(branches) = value else {
        return Err(AdapterError::BadRequest(format!("{key} expects an array of queries")));
    };

    branches
        .iter()
        .map(|branch| match branch {
            Bson::Document(doc) => parse_nested(doc),
            other => Err(AdapterError::BadRequest(format!(
                "{key} entries must be documents, got {other:?}"
            ))),
        })
        .collect()
}

fn parse_field(field: &str, value: &Bson) -> AdapterResult<Vec<Predicate>> {
    let operators = match value {
        Bson::Document(map) if map.keys().any(|k| k.starts_with('$')) => map,
        _ => return Ok(vec![Predicate::compare(field, Operator::Eq, value.clone())]),
    };

    if let Some(plain) = operators.keys().find(|k| !k.starts_with('$')) {
        return Err(AdapterError::BadRequest(format!(
            "field '{field}' mixes operators with the plain key '{plain}'"
        )));
    }

    operators
        .iter()
        .map(|(key, operand)| {
            let op = Operator::from_key(key).ok_or_else(|| {
                AdapterError::BadRequest(format!("Invalid query parameter {key} on field '{field}'"))
            })?;

            op.validate(field, operand)?;

            Ok(Predicate::compare(field, op, operand.clone()))
        })
        .collect()
}

fn parse_count(key: &str, value: &Bson) -> AdapterResult<u64> {
    let count = match value {
        Bson::Int32(n) => u64::try_from(*n).ok(),
        Bson::Int64(n) => u64::try_from(*n).ok(),
        Bson::Double(n) if n.fract() == 0.0 && *n >= 0.0 => Some(*n as u64),
        Bson::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    count.ok_or_else(|| {
        AdapterError::BadRequest(format!("{key} must be a non-negative integer, got {value:?}"))
    })
}

fn parse_select(value: &Bson) -> AdapterResult<Vec<String>> {
    let Bson::Array(items) = value else {
        return Err(AdapterError::BadRequest(format!(
            "$select must be an array of field names, got {value:?}"
        )));
    };

    let mut fields: Vec<String> = Vec::with_capacity(items.len());

    for item in items {
        match item {
            Bson::String(name) if !fields.contains(name) => fields.push(name.clone()),
            Bson::String(_) => {}
            other => {
                return Err(AdapterError::BadRequest(format!(
                    "$select entries must be strings, got {other:?}"
                )));
            }
        }
    }

    Ok(fields)
}

fn parse_sort(value: &Bson) -> AdapterResult<Vec<Sort>> {
    let Bson::Document(keys) = value else {
        return Err(AdapterError::BadRequest(format!("$sort must be a document, got {value:?}")));
    };

    keys.iter()
        .map(|(field, raw)| {
            let direction = match raw {
                Bson::Int32(n) if *n > 0 => Some(SortDirection::Asc),
                Bson::Int32(n) if *n < 0 => Some(SortDirection::Desc),
                Bson::Int64(n) if *n > 0 => Some(SortDirection::Asc),
                Bson::Int64(n) if *n < 0 => Some(SortDirection::Desc),
                Bson::Double(n) if *n > 0.0 => Some(SortDirection::Asc),
                Bson::Double(n) if *n < 0.0 => Some(SortDirection::Desc),
                Bson::String(s) => match s.to_ascii_lowercase().as_str() {
                    "1" | "asc" | "ascending" => Some(SortDirection::Asc),
                    "-1" | "desc" | "descending" => Some(SortDirection::Desc),
                    _ => None,
                },
                _ => None,
            };

            direction
                .map(|direction| Sort { field: field.clone(), direction })
                .ok_or_else(|| {
                    AdapterError::BadRequest(format!(
                        "$sort direction for '{field}' must be 1 or -1, got {raw:?}"
                    ))
                })
        })
        .collect()
}

/// Helper struct for constructing predicates.
///
/// # Example
///
/// ```ignore
/// use crudlayer::query::Filter;
///
/// let predicate = Filter::eq("name", "Alice")
///     .and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Equality. Matches `null` and missing fields when `value` is `null`.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Predicate {
        Predicate::compare(field, Operator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Predicate {
        Predicate::compare(field, Operator::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Predicate {
        Predicate::compare(field, Operator::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Predicate {
        Predicate::compare(field, Operator::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Predicate {
        Predicate::compare(field, Operator::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Predicate {
        Predicate::compare(field, Operator::Lte, value)
    }

    /// Set membership.
    pub fn is_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::compare(field, Operator::In, Bson::Array(values.into_iter().map(Into::into).collect()))
    }

    /// Set exclusion.
    pub fn not_in<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::compare(field, Operator::Nin, Bson::Array(values.into_iter().map(Into::into).collect()))
    }

    /// Case-sensitive `%` pattern match.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Predicate {
        Predicate::compare(field, Operator::Like, pattern.into())
    }

    pub fn not_like(field: impl Into<String>, pattern: impl Into<String>) -> Predicate {
        Predicate::compare(field, Operator::NotLike, pattern.into())
    }

    /// Case-insensitive `%` pattern match.
    pub fn ilike(field: impl Into<String>, pattern: impl Into<String>) -> Predicate {
        Predicate::compare(field, Operator::ILike, pattern.into())
    }

    pub fn not_ilike(field: impl Into<String>, pattern: impl Into<String>) -> Predicate {
        Predicate::compare(field, Operator::NotILike, pattern.into())
    }

    /// Null-safe equality (`IS`).
    pub fn is(field: impl Into<String>, value: impl Into<Bson>) -> Predicate {
        Predicate::compare(field, Operator::Is, value)
    }

    /// Null-safe inequality (`IS NOT`).
    pub fn is_not(field: impl Into<String>, value: impl Into<Bson>) -> Predicate {
        Predicate::compare(field, Operator::IsNot, value)
    }

    pub fn search(field: impl Into<String>, terms: impl Into<String>) -> Predicate {
        Predicate::compare(field, Operator::Search, terms.into())
    }

    pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
        Predicate::And(predicates.into_iter().collect())
    }

    pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
        Predicate::Or(predicates.into_iter().collect())
    }
}

/// Builds a raw query document.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    filter: Option<Predicate>,
    directives: Directives,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter. Calling this more than once ANDs the filters together.
    ///
    /// # Arguments
    ///
    /// * `filter` - The predicate to apply
    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Sets the `$select` projection.
    pub fn select<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.directives.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Appends a sort key.
    ///
    /// # Arguments
    ///
    /// * `field` - The field name to sort by
    /// * `direction` - The sort direction (ascending or descending)
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.directives
            .sort
            .get_or_insert_with(Vec::new)
            .push(Sort { field: field.into(), direction });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.directives.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.directives.skip = Some(skip);
        self
    }

    /// Builds the raw query document.
    pub fn build(self) -> Document {
        let mut raw = self
            .filter
            .map(|filter| filter.to_document())
            .unwrap_or_default();

        if let Some(select) = self.directives.select {
            raw.insert("$select", select);
        }
        if let Some(sort) = self.directives.sort {
            let mut keys = Document::new();
            for Sort { field, direction } in sort {
                keys.insert(field, match direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                });
            }
            raw.insert("$sort", keys);
        }
        if let Some(limit) = self.directives.limit {
            raw.insert("$limit", limit as i64);
        }
        if let Some(skip) = self.directives.skip {
            raw.insert("$skip", skip as i64);
        }

        raw
    }
}

/// Walks a [`Predicate`] tree, producing one output per node.
///
/// This is the compiler interface: every backend family implements it once.
/// Implementations must keep `$and`/`$or` grouping intact and give each leaf the
/// same meaning the in-memory evaluator gives it.
pub trait PredicateVisitor {
    type Output;
    type Error: Into<AdapterError>;

    fn visit_and(&mut self, children: &[Predicate]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, children: &[Predicate]) -> Result<Self::Output, Self::Error>;
    fn visit_compare(
        &mut self,
        field: &str,
        op: Operator,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit(&mut self, predicate: &Predicate) -> Result<Self::Output, Self::Error> {
        match predicate {
            Predicate::And(children) => self.visit_and(children),
            Predicate::Or(children) => self.visit_or(children),
            Predicate::Compare { field, op, value } => self.visit_compare(field, *op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn separates_directives_from_predicate() {
        let query = Query::parse(&doc! {
            "name": "Alice",
            "$limit": 2,
            "$skip": "1",
            "$select": ["name", "name", "age"],
            "$sort": { "age": -1, "name": 1 },
        })
        .unwrap();

        assert_eq!(
            query.predicate,
            Predicate::And(vec![Filter::eq("name", "Alice")])
        );
        assert_eq!(query.directives.limit, Some(2));
        assert_eq!(query.directives.skip, Some(1));
        assert_eq!(
            query.directives.select,
            Some(vec!["name".to_string(), "age".to_string()])
        );
        assert_eq!(
            query.directives.sort,
            Some(vec![
                Sort { field: "age".into(), direction: SortDirection::Desc },
                Sort { field: "name".into(), direction: SortDirection::Asc },
            ])
        );
    }

    #[test]
    fn absent_directives_stay_absent() {
        let query = Query::parse(&doc! {}).unwrap();

        assert_eq!(query.directives, Directives::default());
        assert!(query.predicate.is_unconstrained());
    }

    #[test]
    fn operator_map_becomes_conjunction_of_leaves() {
        let query = Query::parse(&doc! { "age": { "$gte": 18, "$lt": 65 } }).unwrap();

        assert_eq!(
            query.predicate,
            Predicate::And(vec![Filter::gte("age", 18), Filter::lt("age", 65)])
        );
    }

    #[test]
    fn nested_logic_keeps_its_shape() {
        let query = Query::parse(&doc! {
            "$or": [
                { "name": "Alice" },
                { "$and": [{ "age": { "$gt": 10 } }, { "age": { "$lt": 20 } }] },
            ],
        })
        .unwrap();

        assert_eq!(
            query.predicate,
            Predicate::And(vec![Predicate::Or(vec![
                Filter::eq("name", "Alice"),
                Predicate::And(vec![Filter::gt("age", 10), Filter::lt("age", 20)]),
            ])])
        );
    }

    #[test]
    fn unknown_top_level_keys_are_fields() {
        let query = Query::parse(&doc! { "$custom": 1, "profile": { "city": "Oslo" } }).unwrap();

        assert_eq!(
            query.predicate,
            Predicate::And(vec![
                Filter::eq("$custom", 1),
                Filter::eq("profile", doc! { "city": "Oslo" }),
            ])
        );
    }

    #[test]
    fn unknown_operator_is_bad_request() {
        let err = Query::parse(&doc! { "age": { "$between": [1, 2] } }).unwrap_err();

        assert!(err.is_bad_request());
        assert!(err.to_string().contains("$between"));
    }

    #[test]
    fn equality_has_no_operator_key() {
        let err = Query::parse(&doc! { "age": { "$eq": 3 } }).unwrap_err();
        assert!(err.is_bad_request());

        assert_eq!(Operator::from_key("$eq"), None);
        assert!(Query::parse(&doc! { "age": 3 }).is_ok());
    }

    #[test]
    fn malformed_operands_are_rejected() {
        for raw in [
            doc! { "age": { "$in": 3 } },
            doc! { "name": { "$like": 3 } },
            doc! { "age": { "$lt": null } },
            doc! { "name": { "$search": "  " } },
            doc! { "age": { "$gt": 1, "plain": 2 } },
            doc! { "$or": { "name": "x" } },
            doc! { "$or": [{ "$limit": 1 }] },
            doc! { "$limit": -1 },
            doc! { "$select": "name" },
            doc! { "$sort": { "name": 0 } },
        ] {
            assert!(Query::parse(&raw).unwrap_err().is_bad_request(), "{raw:?}");
        }
    }

    #[test]
    fn builder_output_round_trips_through_parser() {
        let raw = Query::builder()
            .filter(Filter::eq("name", "Alice"))
            .filter(Filter::or([Filter::gt("age", 18), Filter::is("age", Bson::Null)]))
            .select(["name"])
            .sort("age", SortDirection::Desc)
            .limit(5)
            .skip(10)
            .build();
        let query = Query::parse(&raw).unwrap();

        assert_eq!(query.directives.limit, Some(5));
        assert_eq!(query.directives.skip, Some(10));
        assert_eq!(query.directives.select, Some(vec!["name".to_string()]));
        assert_eq!(query.predicate.find_operator(Operator::Is).len(), 1);
        assert_eq!(query.predicate.find_operator(Operator::Gt).len(), 1);
    }

    #[test]
    fn identifier_values_can_be_rewritten() {
        let query = Query::parse(&doc! {
            "_id": { "$in": ["a", "b"] },
            "$or": [{ "_id": "c" }],
        })
        .unwrap();
        let predicate = query
            .predicate
            .map_field_values("_id", &|v| match v {
                Bson::String(s) => Bson::String(s.to_uppercase()),
                other => other,
            });

        assert_eq!(
            predicate,
            Predicate::And(vec![
                Filter::is_in("_id", ["A", "B"]),
                Predicate::Or(vec![Filter::eq("_id", "c")]),
            ])
        );
    }

    #[test]
    fn equality_constraints_only_look_at_root() {
        let query = Query::parse(&doc! { "id": 3, "$or": [{ "id": 4 }] }).unwrap();

        assert_eq!(query.predicate.equality_constraints("id"), vec![&Bson::Int32(3)]);
    }
}
