//! Conversions between BSON values, sea-query values and SQLite rows.

use bson::{Bson, Document};
use sea_query::{Value, Values};
use serde::{Deserialize, Serialize};
use sqlx::{
    Column, Row, TypeInfo, ValueRef,
    query::Query,
    sqlite::{Sqlite, SqliteArguments, SqliteRow},
};

use crudlayer_core::error::{AdapterError, AdapterResult};

/// How booleans are written to the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolEncoding {
    /// `0`/`1` integers, SQLite's native representation.
    #[default]
    Integer,
    /// Driver-native boolean parameters.
    Native,
}

/// Converts a BSON value into a bindable SQL value.
///
/// Documents and arrays are stored as JSON text, date-times as epoch
/// milliseconds and object ids as hex strings.
///
/// # Errors
///
/// Returns [`AdapterError::BadRequest`] for BSON types with no SQL counterpart.
pub fn to_sql_value(value: &Bson, booleans: BoolEncoding) -> AdapterResult<Value> {
    Ok(match value {
        Bson::Null | Bson::Undefined => Value::String(None),
        Bson::Boolean(b) => match booleans {
            BoolEncoding::Integer => Value::BigInt(Some(i64::from(*b))),
            BoolEncoding::Native => Value::Bool(Some(*b)),
        },
        Bson::Int32(n) => Value::Int(Some(*n)),
        Bson::Int64(n) => Value::BigInt(Some(*n)),
        Bson::Double(n) => Value::Double(Some(*n)),
        Bson::String(s) => Value::String(Some(Box::new(s.clone()))),
        Bson::DateTime(dt) => Value::BigInt(Some(dt.timestamp_millis())),
        Bson::ObjectId(oid) => Value::String(Some(Box::new(oid.to_hex()))),
        Bson::Binary(binary) => Value::Bytes(Some(Box::new(binary.bytes.clone()))),
        Bson::Decimal128(d) => Value::String(Some(Box::new(d.to_string()))),
        Bson::Document(_) | Bson::Array(_) => Value::String(Some(Box::new(
            value.clone().into_relaxed_extjson().to_string(),
        ))),
        other => {
            return Err(AdapterError::BadRequest(format!(
                "value {other:?} cannot be stored in a SQL column"
            )));
        }
    })
}

/// Binds sea-query parameter values onto an `sqlx` query, in order.
pub fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: Values,
) -> AdapterResult<Query<'q, Sqlite, SqliteArguments<'q>>> {
    for value in values.0 {
        query = match value {
            Value::Bool(v) => query.bind(v),
            Value::TinyInt(v) => query.bind(v.map(i64::from)),
            Value::SmallInt(v) => query.bind(v.map(i64::from)),
            Value::Int(v) => query.bind(v.map(i64::from)),
            Value::BigInt(v) => query.bind(v),
            Value::TinyUnsigned(v) => query.bind(v.map(i64::from)),
            Value::SmallUnsigned(v) => query.bind(v.map(i64::from)),
            Value::Unsigned(v) => query.bind(v.map(i64::from)),
            Value::BigUnsigned(v) => query.bind(v.map(|n| i64::try_from(n).unwrap_or(i64::MAX))),
            Value::Float(v) => query.bind(v.map(f64::from)),
            Value::Double(v) => query.bind(v),
            Value::String(v) => query.bind(v.map(|s| *s)),
            Value::Char(v) => query.bind(v.map(String::from)),
            Value::Bytes(v) => query.bind(v.map(|b| *b)),
            #[allow(unreachable_patterns)]
            other => {
                return Err(AdapterError::BadRequest(format!(
                    "parameter {other:?} is not supported by the SQLite driver"
                )));
            }
        };
    }

    Ok(query)
}

/// Decodes a result row into a record, keyed by column name.
///
/// Columns declared `BOOLEAN` decode to booleans; everything else follows the
/// value's runtime storage class. Integers that fit in 32 bits decode to
/// `Int32`.
pub fn decode_row(row: &SqliteRow) -> AdapterResult<Document> {
    let mut record = Document::new();

    for column in row.columns() {
        let index = column.ordinal();
        record.insert(column.name(), decode_column(row, index, column.type_info().name())?);
    }

    Ok(record)
}

fn decode_column(row: &SqliteRow, index: usize, declared: &str) -> AdapterResult<Bson> {
    let raw = row.try_get_raw(index).map_err(decode_error)?;

    if raw.is_null() {
        return Ok(Bson::Null);
    }

    if declared.eq_ignore_ascii_case("BOOLEAN") {
        return Ok(Bson::Boolean(
            row.try_get_unchecked::<i64, _>(index).map_err(decode_error)? != 0,
        ));
    }

    let storage = raw.type_info().name().to_ascii_uppercase();

    Ok(match storage.as_str() {
        "INTEGER" | "INT8" | "BIGINT" | "INT" | "BOOLEAN" => {
            let n = row.try_get_unchecked::<i64, _>(index).map_err(decode_error)?;

            i32::try_from(n).map_or(Bson::Int64(n), Bson::Int32)
        }
        "REAL" | "DOUBLE" | "FLOAT" | "NUMERIC" => {
            Bson::Double(row.try_get_unchecked::<f64, _>(index).map_err(decode_error)?)
        }
        "BLOB" => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: row.try_get_unchecked::<Vec<u8>, _>(index).map_err(decode_error)?,
        }),
        _ => Bson::String(row.try_get_unchecked::<String, _>(index).map_err(decode_error)?),
    })
}

fn decode_error(error: sqlx::Error) -> AdapterError {
    AdapterError::Serialization(error.to_string())
}

#[cfg(test)]
mod tests {
    use bson::{DateTime, doc, oid::ObjectId};

    use super::*;

    #[test]
    fn booleans_follow_encoding() {
        assert_eq!(
            to_sql_value(&Bson::Boolean(true), BoolEncoding::Integer).unwrap(),
            Value::BigInt(Some(1))
        );
        assert_eq!(
            to_sql_value(&Bson::Boolean(false), BoolEncoding::Native).unwrap(),
            Value::Bool(Some(false))
        );
    }

    #[test]
    fn structured_values_become_text() {
        let value = to_sql_value(&Bson::Document(doc! { "a": 1 }), BoolEncoding::Integer).unwrap();
        assert_eq!(value, Value::String(Some(Box::new(r#"{"a":1}"#.to_string()))));

        let oid = ObjectId::new();
        assert_eq!(
            to_sql_value(&Bson::ObjectId(oid), BoolEncoding::Integer).unwrap(),
            Value::String(Some(Box::new(oid.to_hex())))
        );

        let now = DateTime::from_millis(1_700_000_000_000);
        assert_eq!(
            to_sql_value(&Bson::DateTime(now), BoolEncoding::Integer).unwrap(),
            Value::BigInt(Some(1_700_000_000_000))
        );
    }

    #[test]
    fn unsupported_values_are_rejected() {
        let error = to_sql_value(&Bson::MaxKey, BoolEncoding::Integer).unwrap_err();

        assert!(error.is_bad_request());
    }
}
