//! A uniform CRUD layer over heterogeneous record stores.
//!
//! This crate is the core of the crudlayer project and provides:
//!
//! - **Predicate model** ([`query`]) - Parsing query documents into predicates and directives
//! - **Store backend abstraction** ([`backend`]) - The primitive operations a backend implements
//! - **CRUD orchestration** ([`service`]) - `find`, `get`, `create`, `update`, `patch`, `remove`
//! - **Pagination** ([`page`]) - The `{total, limit, skip, data}` envelope
//! - **Records** ([`record`]) - Record/identifier types, projection and dotted-path lookup
//! - **Pattern matching** ([`pattern`]) - `%`-wildcard patterns shared by every backend
//! - **Error handling** ([`error`]) - The shared error taxonomy and per-backend classifiers
//!
//! # Example
//!
//! ```ignore
//! use bson::doc;
//! use crudlayer_core::{Params, Service};
//!
//! let service = Service::new(backend);
//! let adults = service
//!     .find_all(Params::new().query(doc! {
//!         "age": { "$gte": 18 },
//!         "$sort": { "name": 1 },
//!     }))
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as crudlayer_core;

pub mod backend;
pub mod error;
pub mod page;
pub mod params;
pub mod pattern;
pub mod query;
pub mod record;
pub mod service;

pub use backend::{Selection, StoreBackend, StoreBackendBuilder};
pub use error::{AdapterError, AdapterResult, ErrorClassifier, ErrorKind};
pub use page::{FindResult, Paginated};
pub use params::Params;
pub use pattern::LikePattern;
pub use query::{
    Directives, Filter, Operator, Predicate, PredicateVisitor, Query, QueryBuilder, Sort,
    SortDirection,
};
pub use record::{DEFAULT_ID_FIELD, Id, Record};
pub use service::{Output, Payload, Service};
