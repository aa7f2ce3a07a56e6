//! In-memory record storage backend for crudlayer.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! Its predicate evaluator is the reference semantics for every other backend: the
//! SQL and MongoDB compilers are tested for agreement with it.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Full query support** - Every operator, `$and`/`$or` grouping, dotted paths,
//!   multi-key sorting and windowing
//! - **Identifier generation** - Sequential integers or UUID strings
//!
//! # Quick Start
//!
//! ```ignore
//! use bson::doc;
//! use crudlayer_core::{Params, Service};
//! use crudlayer_memory::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Service::new(MemoryStore::new());
//!
//!     service.create_one(doc! { "name": "Alice", "age": 30 }, Params::new()).await?;
//!
//!     let adults = service
//!         .find_all(Params::new().query(doc! { "age": { "$gte": 18 } }))
//!         .await?;
//!     assert_eq!(adults.len(), 1);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as crudlayer_memory;

pub mod evaluator;
pub mod store;

pub use store::{IdStrategy, MemoryOptions, MemoryStore, MemoryStoreBuilder, MemoryTable};
