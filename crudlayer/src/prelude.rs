//! Commonly used types in one import.
//!
//! ```ignore
//! use crudlayer::prelude::*;
//! ```

pub use crudlayer_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::{AdapterError, AdapterResult, ErrorClassifier, ErrorKind},
    page::{FindResult, Paginated},
    params::Params,
    query::{Filter, Predicate, Query, QueryBuilder, Sort, SortDirection},
    record::{Id, Record},
    service::{Output, Payload, Service},
};
