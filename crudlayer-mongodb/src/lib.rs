//! MongoDB backend for crudlayer.
//!
//! Predicates are translated into MongoDB filter documents ([`query`]) and run
//! with `find`, or spliced into a caller-supplied aggregation pipeline. Driver
//! failures are classified by [`error::MongoErrorClassifier`].
//!
//! To use this backend through the facade, enable the `mongodb` feature:
//!
//! ```toml
//! [dependencies]
//! crudlayer = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Identifiers
//!
//! With the default `_id` identifier field, 24-character hex strings are
//! converted to `ObjectId`s wherever they identify a record: `id` arguments and
//! identifier clauses in the query alike. Set `disable_objectify` to keep them
//! as strings. With a custom identifier field, `create` generates a hex string
//! identifier when the record carries none.
//!
//! # Patch operators
//!
//! Patch data keys starting with `$` (`$inc`, `$push`, ...) are passed through
//! as update operators; plain keys are wrapped in `$set`.
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use crudlayer_core::{Params, Service, backend::StoreBackendBuilder};
//! use crudlayer_mongodb::MongoDbStore;
//!
//! let store = MongoDbStore::builder("mongodb://localhost:27017", "app", "people")
//!     .build()
//!     .await?;
//! let service = Service::new(store);
//!
//! let adults = service
//!     .find_all(Params::new().query(doc! { "age": { "$gte": 18 } }))
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as crudlayer_mongodb;

pub mod error;
pub mod query;
pub mod store;

pub use error::MongoErrorClassifier;
pub use query::MongoQueryTranslator;
pub use store::{MongoDbStore, MongoDbStoreBuilder, MongoOptions, PIPELINE_MARKER};
