//! Records and identifiers.
//!
//! A record is an ordered BSON [`Document`]. Exactly one field is designated the
//! identifier; its name is configured on the backend (see
//! [`StoreBackend::id_field`](crate::backend::StoreBackend::id_field)).

use bson::{Bson, Document};

/// A stored record.
pub type Record = Document;

/// An identifier value. `Bson::Null` stands for "no identifier".
pub type Id = Bson;

/// Default identifier field name.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Compares two identifier (or scalar) values for equality.
///
/// Numeric values are compared by magnitude so that an `Int32` identifier
/// supplied by a caller matches the `Int64` a backend hands back.
pub fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Resolves a possibly dotted field path against a record.
///
/// A literal key wins over path traversal, so a field literally named `a.b`
/// is found before `{ a: { b } }` is tried.
pub fn lookup<'a>(record: &'a Document, path: &str) -> Option<&'a Bson> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }

    let (head, rest) = path.split_once('.')?;

    match record.get(head)? {
        Bson::Document(inner) => lookup(inner, rest),
        _ => None,
    }
}

/// Applies a `$select` projection to a record.
///
/// The identifier field always survives, even when the caller did not list it.
/// Fields keep the order they have in the stored record. A dotted entry such as
/// `address.city` keeps only that branch of a nested document.
pub fn project(record: Record, select: Option<&[String]>, id_field: &str) -> Record {
    let Some(fields) = select else {
        return record;
    };

    let mut paths: Vec<&str> = fields.iter().map(String::as_str).collect();
    paths.push(id_field);

    project_paths(record, &paths)
}

fn project_paths(record: Record, paths: &[&str]) -> Record {
    let mut projected = Record::new();

    for (key, value) in record {
        if paths.contains(&key.as_str()) {
            projected.insert(key, value);
            continue;
        }

        let nested: Vec<&str> = paths
            .iter()
            .filter_map(|path| path.strip_prefix(key.as_str())?.strip_prefix('.'))
            .collect();

        if nested.is_empty() {
            continue;
        }

        if let Bson::Document(inner) = value {
            let inner = project_paths(inner, &nested);
            if !inner.is_empty() {
                projected.insert(key, inner);
            }
        }
    }

    projected
}
