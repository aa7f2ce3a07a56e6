//! Predicate compilation into sea-query conditions.
//!
//! Every `$and`/`$or` node becomes its own [`Condition`], so grouping survives
//! rendering as parenthesized sub-clauses. Comparisons against `null` become
//! `IS NULL`/`IS NOT NULL`, and the negative operators (`$ne`, `$nin`,
//! `$notlike`, `$notilike`) explicitly admit `NULL` columns so the match set
//! agrees with the in-memory evaluator.
//!
//! SQLite converts values between storage classes through column affinity
//! (`'25'` equals an INTEGER `25`, and `GLOB` reads `32` as `'32'`). String and
//! numeric operands are therefore paired with a `typeof` check on the column.
//!
//! `$ilike`, `$notilike` and `$search` compile to `REGEXP` so that case folding
//! is Unicode-aware. The connection must have the `regexp` function registered;
//! see [`connect_options`](crate::store::connect_options).

use bson::Bson;
use sea_query::{Alias, Condition, Expr, SimpleExpr};

use crudlayer_core::{
    error::{AdapterError, AdapterResult},
    pattern::{LikePattern, contains_regex, search_terms},
    query::{Operator, Predicate, PredicateVisitor},
};

use crate::value::{BoolEncoding, to_sql_value};

/// SQLite storage classes an operand can be compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageClass {
    Text,
    Numeric,
}

impl StorageClass {
    fn of(value: &Bson) -> Option<Self> {
        match value {
            Bson::String(_) => Some(StorageClass::Text),
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Some(StorageClass::Numeric),
            _ => None,
        }
    }

    fn type_names(self) -> &'static str {
        match self {
            StorageClass::Text => "('text')",
            StorageClass::Numeric => "('integer', 'real')",
        }
    }
}

/// Compiles predicates against one table.
#[derive(Debug, Clone)]
pub struct SqlCompiler {
    table: String,
    booleans: BoolEncoding,
}

impl SqlCompiler {
    pub fn new(table: impl Into<String>, booleans: BoolEncoding) -> Self {
        Self {
            table: table.into(),
            booleans,
        }
    }

    /// Compiles a predicate into a `WHERE` condition.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::BadRequest`] if an operand cannot be bound.
    pub fn compile(&mut self, predicate: &Predicate) -> AdapterResult<Condition> {
        self.visit(predicate)
    }

    /// Column reference for a field. `table.column` addresses a joined table;
    /// anything else is qualified with the compiler's own table.
    pub fn column(&self, field: &str) -> Expr {
        match field.split_once('.') {
            Some((table, column)) => Expr::col((Alias::new(table), Alias::new(column))),
            None => Expr::col((Alias::new(&self.table), Alias::new(field))),
        }
    }

    fn value(&self, value: &Bson) -> AdapterResult<SimpleExpr> {
        Ok(SimpleExpr::Value(to_sql_value(value, self.booleans)?))
    }

    fn values<'v>(&self, values: impl IntoIterator<Item = &'v Bson>) -> AdapterResult<Vec<SimpleExpr>> {
        values.into_iter().map(|value| self.value(value)).collect()
    }

    /// `typeof(column) IN (...)`, or `NOT IN` when `holds` is false.
    fn stored_as(&self, field: &str, class: StorageClass, holds: bool) -> SimpleExpr {
        let template = format!(
            "typeof(?) {} {}",
            if holds { "IN" } else { "NOT IN" },
            class.type_names()
        );

        Expr::cust_with_exprs(template, [SimpleExpr::from(self.column(field))])
    }

    /// `expr`, restricted to columns holding `class`.
    fn typed(&self, field: &str, class: Option<StorageClass>, expr: SimpleExpr) -> Condition {
        match class {
            Some(class) => Condition::all().add(self.stored_as(field, class, true)).add(expr),
            None => single(expr),
        }
    }

    /// Negation of [`typed`](Self::typed): `expr` holds, the column is `NULL`, or
    /// it holds a different storage class.
    fn typed_negation(&self, field: &str, class: Option<StorageClass>, expr: SimpleExpr) -> Condition {
        let condition = Condition::any().add(expr).add(self.column(field).is_null());

        match class {
            Some(class) => condition.add(self.stored_as(field, class, false)),
            None => condition,
        }
    }

    fn glob(&self, field: &str, pattern: &str) -> SimpleExpr {
        Expr::cust_with_exprs(
            "? GLOB ?",
            [
                SimpleExpr::from(self.column(field)),
                SimpleExpr::Value(LikePattern::new(pattern).to_glob().into()),
            ],
        )
    }

    fn regexp(&self, field: &str, regex: String) -> SimpleExpr {
        Expr::cust_with_exprs(
            "? REGEXP ?",
            [SimpleExpr::from(self.column(field)), SimpleExpr::Value(regex.into())],
        )
    }

    /// `$like` family match on text columns only.
    fn pattern(&self, field: &str, op: Operator, pattern: &str) -> Condition {
        let text = Some(StorageClass::Text);
        let expr = match op {
            Operator::Like | Operator::NotLike => self.glob(field, pattern),
            _ => self.regexp(field, LikePattern::new(pattern).to_regex(true)),
        };

        match op {
            Operator::NotLike | Operator::NotILike => self.typed_negation(field, text, expr.not()),
            _ => self.typed(field, text, expr),
        }
    }

    fn set_membership(&self, field: &str, items: &[Bson], negated: bool) -> AdapterResult<Condition> {
        let includes_null = items.iter().any(|item| matches!(item, Bson::Null));
        let mut groups: Vec<(Option<StorageClass>, Vec<&Bson>)> = Vec::new();

        for item in items.iter().filter(|item| !matches!(item, Bson::Null)) {
            let class = StorageClass::of(item);
            match groups.iter_mut().find(|(group, _)| *group == class) {
                Some((_, members)) => members.push(item),
                None => groups.push((class, vec![item])),
            }
        }

        if groups.is_empty() && !includes_null {
            return Ok(single(Expr::cust(if negated { "1 = 1" } else { "1 = 0" })));
        }

        let mut condition = if negated { Condition::all() } else { Condition::any() };

        for (class, members) in groups {
            let values = self.values(members.iter().copied())?;
            let mut clause = if negated {
                Condition::any()
                    .add(self.column(field).is_not_in(values))
                    .add(self.column(field).is_null())
            } else {
                Condition::all().add(self.column(field).is_in(values))
            };

            if let Some(class) = class {
                clause = clause.add(self.stored_as(field, class, !negated));
            }

            condition = condition.add(clause);
        }

        if includes_null {
            condition = condition.add(if negated {
                self.column(field).is_not_null()
            } else {
                self.column(field).is_null()
            });
        }

        Ok(condition)
    }
}

fn single(expr: SimpleExpr) -> Condition {
    Condition::all().add(expr)
}

impl PredicateVisitor for SqlCompiler {
    type Output = Condition;
    type Error = AdapterError;

    fn visit_and(&mut self, children: &[Predicate]) -> Result<Self::Output, Self::Error> {
        if children.is_empty() {
            return Ok(single(Expr::cust("1 = 1")));
        }

        children
            .iter()
            .try_fold(Condition::all(), |condition, child| Ok(condition.add(self.visit(child)?)))
    }

    fn visit_or(&mut self, children: &[Predicate]) -> Result<Self::Output, Self::Error> {
        if children.is_empty() {
            return Ok(single(Expr::cust("1 = 0")));
        }

        children
            .iter()
            .try_fold(Condition::any(), |condition, child| Ok(condition.add(self.visit(child)?)))
    }

    fn visit_compare(&mut self, field: &str, op: Operator, value: &Bson) -> Result<Self::Output, Self::Error> {
        let column = self.column(field);
        let class = StorageClass::of(value);

        Ok(match (op, value) {
            (Operator::Eq | Operator::Is, Bson::Null) => single(column.is_null()),
            (Operator::Ne | Operator::IsNot, Bson::Null) => single(column.is_not_null()),
            (Operator::Eq | Operator::Is, value) => self.typed(field, class, column.eq(self.value(value)?)),
            (Operator::Ne | Operator::IsNot, value) => {
                self.typed_negation(field, class, column.ne(self.value(value)?))
            }
            (Operator::In, Bson::Array(items)) => self.set_membership(field, items, false)?,
            (Operator::Nin, Bson::Array(items)) => self.set_membership(field, items, true)?,
            (Operator::Lt, value) => self.typed(field, class, column.lt(self.value(value)?)),
            (Operator::Lte, value) => self.typed(field, class, column.lte(self.value(value)?)),
            (Operator::Gt, value) => self.typed(field, class, column.gt(self.value(value)?)),
            (Operator::Gte, value) => self.typed(field, class, column.gte(self.value(value)?)),
            (op, Bson::String(pattern)) if op.is_pattern() => self.pattern(field, op, pattern),
            (Operator::Search, Bson::String(terms)) => {
                search_terms(terms).iter().fold(Condition::all(), |condition, term| {
                    condition.add(self.typed(field, class, self.regexp(field, contains_regex(term))))
                })
            }
            (op, value) => {
                return Err(AdapterError::BadRequest(format!(
                    "{op} on field '{field}' cannot take {value:?}"
                )));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use crudlayer_core::query::Query;
    use sea_query::SqliteQueryBuilder;

    use super::*;

    fn render(query: bson::Document) -> String {
        let predicate = Query::parse(&query).unwrap().predicate;
        let condition = SqlCompiler::new("people", BoolEncoding::Integer)
            .compile(&predicate)
            .unwrap();

        sea_query::Query::select()
            .column(Alias::new("id"))
            .from(Alias::new("people"))
            .cond_where(condition)
            .to_string(SqliteQueryBuilder)
    }

    #[test]
    fn null_equality_uses_is_null() {
        let sql = render(doc! { "name": null });
        assert!(sql.contains(r#""people"."name" IS NULL"#), "{sql}");

        let sql = render(doc! { "name": { "$ne": null } });
        assert!(sql.contains(r#""people"."name" IS NOT NULL"#), "{sql}");
    }

    #[test]
    fn not_equal_admits_nulls() {
        let sql = render(doc! { "age": { "$ne": 3 } });

        assert!(sql.contains(r#""people"."age" <> 3"#), "{sql}");
        assert!(sql.contains(r#"OR "people"."age" IS NULL"#), "{sql}");
    }

    #[test]
    fn nested_groups_are_parenthesized() {
        let sql = render(doc! {
            "$or": [
                { "$and": [{ "a": true }, { "b": false }] },
                { "c": true },
            ],
        });

        assert!(sql.contains(r#""people"."a" = 1 AND "people"."b" = 0"#), "{sql}");
        assert!(sql.contains(r#"OR "people"."c" = 1"#), "{sql}");
    }

    #[test]
    fn operands_only_match_their_storage_class() {
        let sql = render(doc! { "age": "25" });
        assert!(sql.contains(r#"(typeof("people"."age") IN ('text')) AND "people"."age" = '25'"#), "{sql}");

        let sql = render(doc! { "name": { "$gte": 3 } });
        assert!(sql.contains(r#"typeof("people"."name") IN ('integer', 'real')"#), "{sql}");

        let sql = render(doc! { "name": { "$ne": "Bob" } });
        assert!(sql.contains(r#"OR (typeof("people"."name") NOT IN ('text'))"#), "{sql}");
    }

    #[test]
    fn like_compiles_to_glob_on_text() {
        let sql = render(doc! { "name": { "$like": "A%" } });
        assert!(
            sql.contains(r#"(typeof("people"."name") IN ('text')) AND ("people"."name" GLOB 'A*')"#),
            "{sql}"
        );

        let sql = render(doc! { "name": { "$notlike": "A%" } });
        assert!(sql.contains(r#"NOT ("people"."name" GLOB 'A*')"#), "{sql}");
        assert!(sql.contains(r#"OR (typeof("people"."name") NOT IN ('text'))"#), "{sql}");
    }

    #[test]
    fn case_insensitive_operators_use_regexp() {
        let sql = render(doc! { "name": { "$ilike": "é%" } });
        assert!(sql.contains(r#""people"."name" REGEXP '(?is)\Aé.*\z'"#), "{sql}");

        let sql = render(doc! { "name": { "$search": "Bob smith" } });
        assert!(sql.contains(r#"REGEXP '(?is)bob'"#), "{sql}");
        assert!(sql.contains(r#"REGEXP '(?is)smith'"#), "{sql}");
    }

    #[test]
    fn qualified_fields_address_other_tables() {
        let sql = render(doc! { "teams.name": "red" });

        assert!(sql.contains(r#""teams"."name" = 'red'"#), "{sql}");
    }

    #[test]
    fn empty_sets() {
        assert!(render(doc! { "a": { "$in": [] } }).contains("1 = 0"));
        assert!(render(doc! { "a": { "$nin": [] } }).contains("1 = 1"));
    }

    #[test]
    fn set_members_are_grouped_by_storage_class() {
        let sql = render(doc! { "a": { "$in": [1, "1", null] } });

        assert!(sql.contains(r#""people"."a" IN (1)"#), "{sql}");
        assert!(sql.contains(r#""people"."a" IN ('1')"#), "{sql}");
        assert!(sql.contains(r#"OR "people"."a" IS NULL"#), "{sql}");
    }
}
