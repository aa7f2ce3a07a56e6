//! Predicate translation into MongoDB filter documents.
//!
//! MongoDB already treats a missing field as `null` and lets `$ne`/`$nin`
//! match documents where the field is absent, so most operators map one to
//! one. The `%` patterns become anchored `$regex` operands. `$search` has no
//! per-field form: it is hoisted into the collection's single `$text` clause.

use bson::{Bson, Document, doc};

use crudlayer_core::{
    error::{AdapterError, AdapterResult},
    pattern::{LikePattern, search_terms},
    query::{Operator, Predicate, PredicateVisitor},
};

/// Translates predicates into MongoDB filter documents.
#[derive(Debug, Default)]
pub struct MongoQueryTranslator {
    text: Option<String>,
    or_depth: usize,
}

impl MongoQueryTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translates a whole predicate into a filter, including the hoisted
    /// `$text` clause if the predicate uses `$search`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BadRequest`] if `$search` appears more than once
    /// or under an `$or`, or if an operand has the wrong shape.
    pub fn translate(mut self, predicate: &Predicate) -> AdapterResult<Document> {
        let mut filter = self.visit(predicate)?;

        if let Some(search) = self.text.take() {
            filter.insert("$text", doc! { "$search": search });
        }

        Ok(filter)
    }

    fn regex(pattern: &str, case_insensitive: bool) -> Document {
        let options = if case_insensitive { "is" } else { "s" };

        doc! {
            "$regex": LikePattern::new(pattern).regex_body(),
            "$options": options,
        }
    }

    fn hoist_search(&mut self, field: &str, terms: &str) -> AdapterResult<()> {
        if self.or_depth > 0 {
            return Err(AdapterError::BadRequest(format!(
                "$search on '{field}' cannot be nested under $or"
            )));
        }
        if self.text.is_some() {
            return Err(AdapterError::BadRequest(
                "only one $search clause is supported per query".to_string(),
            ));
        }

        // Quoted terms are all required by the text index.
        self.text = Some(
            search_terms(terms)
                .iter()
                .map(|term| format!("\"{term}\""))
                .collect::<Vec<_>>()
                .join(" "),
        );

        Ok(())
    }
}

impl PredicateVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = AdapterError;

    fn visit_and(&mut self, children: &[Predicate]) -> Result<Self::Output, Self::Error> {
        let clauses = children
            .iter()
            .map(|child| self.visit(child))
            .filter(|clause| !matches!(clause, Ok(clause) if clause.is_empty()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match clauses.len() {
            0 => Document::new(),
            1 => clauses.into_iter().next().unwrap_or_default(),
            _ => doc! { "$and": clauses },
        })
    }

    fn visit_or(&mut self, children: &[Predicate]) -> Result<Self::Output, Self::Error> {
        if children.is_empty() {
            return Ok(doc! { "$expr": false });
        }

        self.or_depth += 1;
        let clauses = children
            .iter()
            .map(|child| self.visit(child))
            .collect::<Result<Vec<_>, _>>();
        self.or_depth -= 1;

        Ok(doc! { "$or": clauses? })
    }

    fn visit_compare(&mut self, field: &str, op: Operator, value: &Bson) -> Result<Self::Output, Self::Error> {
        let condition = match (op, value) {
            (Operator::Eq | Operator::Is, value) => doc! { "$eq": value },
            (Operator::Ne | Operator::IsNot, value) => doc! { "$ne": value },
            (Operator::In, Bson::Array(_)) => doc! { "$in": value },
            (Operator::Nin, Bson::Array(_)) => doc! { "$nin": value },
            (Operator::Lt, value) => doc! { "$lt": value },
            (Operator::Lte, value) => doc! { "$lte": value },
            (Operator::Gt, value) => doc! { "$gt": value },
            (Operator::Gte, value) => doc! { "$gte": value },
            (Operator::Like, Bson::String(pattern)) => Self::regex(pattern, false),
            (Operator::ILike, Bson::String(pattern)) => Self::regex(pattern, true),
            (Operator::NotLike, Bson::String(pattern)) => doc! { "$not": Self::regex(pattern, false) },
            (Operator::NotILike, Bson::String(pattern)) => doc! { "$not": Self::regex(pattern, true) },
            (Operator::Search, Bson::String(terms)) => {
                self.hoist_search(field, terms)?;
                return Ok(Document::new());
            }
            (op, value) => {
                return Err(AdapterError::BadRequest(format!(
                    "{op} on field '{field}' cannot take {value:?}"
                )));
            }
        };

        Ok(doc! { field: condition })
    }
}

#[cfg(test)]
mod tests {
    use crudlayer_core::query::Query;

    use super::*;

    fn translate(query: Document) -> AdapterResult<Document> {
        MongoQueryTranslator::new().translate(&Query::parse(&query)?.predicate)
    }

    #[test]
    fn single_clause_is_unwrapped() {
        assert_eq!(
            translate(doc! { "name": "Doug" }).unwrap(),
            doc! { "name": { "$eq": "Doug" } }
        );
        assert_eq!(translate(doc! {}).unwrap(), doc! {});
    }

    #[test]
    fn groups_keep_their_shape() {
        let filter = translate(doc! {
            "age": { "$gte": 18 },
            "$or": [{ "name": "Bob" }, { "name": null }],
        })
        .unwrap();

        assert_eq!(
            filter,
            doc! {
                "$and": [
                    { "age": { "$gte": 18 } },
                    { "$or": [{ "name": { "$eq": "Bob" } }, { "name": { "$eq": null } }] },
                ],
            }
        );
    }

    #[test]
    fn empty_or_matches_nothing() {
        assert_eq!(translate(doc! { "$or": [] }).unwrap(), doc! { "$expr": false });
    }

    #[test]
    fn patterns_become_anchored_regexes() {
        assert_eq!(
            translate(doc! { "name": { "$notilike": "d.%" } }).unwrap(),
            doc! { "name": { "$not": { "$regex": "\\Ad\\..*\\z", "$options": "is" } } }
        );
    }

    #[test]
    fn search_is_hoisted_to_text() {
        assert_eq!(
            translate(doc! { "bio": { "$search": "Rust async" }, "age": 3 }).unwrap(),
            doc! { "age": { "$eq": 3 }, "$text": { "$search": "\"rust\" \"async\"" } }
        );
    }

    #[test]
    fn search_placement_is_restricted() {
        let error = translate(doc! { "$or": [{ "bio": { "$search": "rust" } }, { "age": 3 }] }).unwrap_err();
        assert!(error.is_bad_request());

        let error = translate(doc! {
            "bio": { "$search": "rust" },
            "title": { "$search": "async" },
        })
        .unwrap_err();
        assert!(error.is_bad_request());
    }
}
