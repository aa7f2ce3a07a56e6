//! SQLite storage backend for crudlayer.
//!
//! Predicates compile into sea-query conditions ([`compiler`]); statements run
//! through `sqlx` on a pool or a caller-owned transaction ([`store`]). Driver
//! failures are classified by [`error::SqliteErrorClassifier`].
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use crudlayer_core::{Params, Service, backend::StoreBackendBuilder};
//! use crudlayer_sql::SqliteStore;
//!
//! let store = SqliteStore::builder()
//!     .url("sqlite://people.db")
//!     .table("people")
//!     .build()
//!     .await?;
//! let service = Service::new(store);
//!
//! let page = service
//!     .find_page(Params::new().query(doc! { "name": { "$ilike": "a%" }, "$limit": 10 }))
//!     .await?;
//! ```
//!
//! # Transactions
//!
//! [`SqliteStore::begin`] returns a handle that can be passed to any call through
//! `Params::handle`; [`SqliteStore::commit`] commits it once every call using it
//! has finished. Dropping the handle rolls back.
//!
//! # Connections
//!
//! Case-insensitive operators run through SQLite's `REGEXP`, backed by the Rust
//! `regex` engine. Stores built from a url register it automatically; a pool
//! passed to the builder should be connected with [`connect_options`].

#[allow(unused_extern_crates)]
extern crate self as crudlayer_sql;

pub mod compiler;
pub mod error;
pub mod store;
pub mod value;

pub use compiler::SqlCompiler;
pub use error::SqliteErrorClassifier;
pub use store::{SqlOptions, SqliteHandle, SqliteStore, SqliteStoreBuilder, connect_options};
pub use value::BoolEncoding;
