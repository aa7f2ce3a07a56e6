//! Uniform create/read/update/patch/remove over interchangeable record stores.
//!
//! This crate is the entry point of the crudlayer workspace. It re-exports the
//! engine from `crudlayer-core` and the backends from their own crates:
//!
//! - [`memory`] - In-memory store, always available. Its evaluator defines the
//!   query semantics every other backend reproduces.
//! - [`sql`] - SQLite through `sqlx` and `sea-query` (requires the `sql` feature)
//! - [`mongodb`] - MongoDB collections (requires the `mongodb` feature)
//!
//! # Quick Start
//!
//! ```ignore
//! use crudlayer::{prelude::*, memory::MemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> AdapterResult<()> {
//!     let people = Service::new(MemoryStore::new());
//!
//!     people.create_many(
//!         vec![doc! { "name": "Alice", "age": 31 }, doc! { "name": "Bob", "age": 17 }],
//!         Params::new(),
//!     ).await?;
//!
//!     let page = people
//!         .find_page(Params::new().query(doc! {
//!             "age": { "$gte": 18 },
//!             "$sort": { "name": 1 },
//!             "$limit": 10,
//!         }))
//!         .await?;
//!     assert_eq!(page.total, 1);
//!
//!     // Merge into every matching record, then get the updated records back.
//!     let patched = people
//!         .patch_many(doc! { "adult": true }, Params::new().query(doc! { "age": { "$gte": 18 } }))
//!         .await?;
//!     assert_eq!(patched.len(), 1);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Query language
//!
//! A query is a document. `$select`, `$sort`, `$limit` and `$skip` are
//! directives; every other key is a filter. Field filters are either a literal
//! (equality) or an operator map using `$ne`, `$in`, `$nin`, `$lt`, `$lte`,
//! `$gt`, `$gte`, `$like`, `$notlike`, `$ilike`, `$notilike`, `$is`, `$isnot`
//! and `$search`. There is no `$eq` key; write the value itself, or use `$is`.
//! `$and`/`$or` take arrays of nested filters.
//!
//! Queries can also be built with [`query::Query::builder`] and [`query::Filter`],
//! or given as JSON with [`params::Params::query_json`].

pub mod prelude;

pub use crudlayer_core::{backend, error, page, params, pattern, query, record, service};

pub use bson;
pub use serde_json;

/// In-memory backend.
pub mod memory {
    pub use crudlayer_memory::{
        IdStrategy, MemoryOptions, MemoryStore, MemoryStoreBuilder, MemoryTable, evaluator,
    };
}

/// SQLite backend.
///
/// This module is only available when the `sql` feature is enabled.
#[cfg(feature = "sql")]
pub mod sql {
    pub use crudlayer_sql::{
        BoolEncoding, SqlCompiler, SqlOptions, SqliteErrorClassifier, SqliteHandle, SqliteStore,
        SqliteStoreBuilder, connect_options,
    };
}

/// MongoDB backend.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use crudlayer_mongodb::{
        MongoDbStore, MongoDbStoreBuilder, MongoErrorClassifier, MongoOptions, MongoQueryTranslator,
        PIPELINE_MARKER,
    };
}
